// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The diff engine: comparing output images against references with the external image tool.
//!
//! The image tool (`oiiotool`) is treated as an opaque executable. Its info mode tells deep images
//! and channel layouts apart, its diff mode compares two images against four thresholds and writes
//! a difference image, and it produces the PNG thumbnails shown in reports. A non-zero exit code
//! from a diff means the images differ beyond the thresholds, or that the comparison couldn't be
//! made.

use crate::{
    command::{CommandOutcome, ExecOptions, run_command},
    config::{DiffCheck, ImageKind, ImageSlot},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use rendertest_metadata::TestStatus;
use std::io::{self, Write};
use tracing::debug;

/// The numeric tolerances of an image comparison, passed to the image tool as flags.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DiffThresholds {
    /// Fail if any pixel differs by more than this (`--hardfail`).
    pub hardfail: f64,

    /// Pixels differing by more than this count as failing (`--fail`).
    pub fail: f64,

    /// Fail if more than this percentage of pixels are failing (`--failpercent`).
    pub failpercent: f64,

    /// Warn if more than this percentage of pixels differ (`--warnpercent`).
    pub warnpercent: f64,
}

impl Default for DiffThresholds {
    fn default() -> Self {
        Self {
            // 4/256
            hardfail: 0.0157,
            // Less than 1/256
            fail: 0.00001,
            failpercent: 33.334,
            warnpercent: 0.0,
        }
    }
}

impl DiffThresholds {
    /// Returns the thresholds as image tool arguments.
    pub fn to_args(&self) -> Vec<String> {
        [
            ("--hardfail", self.hardfail),
            ("--fail", self.fail),
            ("--failpercent", self.failpercent),
            ("--warnpercent", self.warnpercent),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_owned(), value.to_string()])
        .collect()
    }
}

/// What the image tool reports about a reference image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageInfo {
    /// True for deep images, which are flattened before they are compared.
    pub is_deep: bool,

    /// The channels shown as red, green and blue, comma-separated.
    pub channels: String,

    /// The channel shown as alpha.
    pub alpha: String,
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self {
            is_deep: false,
            channels: "R,G,B".to_owned(),
            alpha: "A".to_owned(),
        }
    }
}

impl ImageInfo {
    /// Parses the output of `oiiotool -v --info`.
    ///
    /// The second line describes the image format, and ends with `deep` for deep images. The
    /// third line is the channel list, unless it lists subimages. Channels are matched to RGBA by
    /// their last letter, so that `diffuse.R` is shown as red; `AR` style channels are skipped. If
    /// any color channel can't be matched, the first channels are shown instead.
    pub fn parse(output: &[String]) -> Option<Self> {
        let mut lines: Vec<&str> = output.iter().map(String::as_str).collect();
        if lines.get(2).is_some_and(|line| line.contains("subimages")) {
            lines.remove(2);
        }
        let format = lines.get(1)?;
        let channel_list = lines.get(2)?.split_once(": ")?.1;

        let is_deep = format
            .rsplit(',')
            .next()
            .is_some_and(|last| last.contains("deep"));

        const GOAL: [char; 4] = ['R', 'G', 'B', 'A'];
        let mut found: [Option<&str>; 4] = [None; 4];
        for channel in channel_list.split(',') {
            let Some(channel) = channel.split_whitespace().next() else {
                continue;
            };
            for (slot, goal) in found.iter_mut().zip(GOAL) {
                let matches_goal = channel.ends_with(goal) && channel != format!("A{goal}");
                if matches_goal && slot.is_none() {
                    *slot = Some(channel);
                }
            }
        }

        let mut info = ImageInfo {
            is_deep,
            ..ImageInfo::default()
        };
        if let Some(alpha) = found[3] {
            info.alpha = alpha.to_owned();
        }
        info.channels = match found {
            [Some(r), Some(g), Some(b), _] => format!("{r},{g},{b}"),
            _ => "0,0,0".to_owned(),
        };
        Some(info)
    }
}

/// The images known after a run, keyed by slot. Images that weren't produced are absent.
pub type ImageSet = IndexMap<ImageSlot, Utf8PathBuf>;

/// The result of one image comparison.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiffDecision {
    /// The comparison didn't run: a pass producing one of the images didn't succeed, or one of
    /// the images is missing.
    Skipped,

    /// The image tool accepted the images.
    Passed,

    /// The image tool reported an error.
    Errored {
        /// True if the error fails the test.
        hard_fail: bool,
    },
}

impl DiffDecision {
    /// Returns true if this decision fails the test.
    pub fn fails_test(self) -> bool {
        matches!(self, DiffDecision::Errored { hard_fail: true })
    }
}

/// Runs the image tool on behalf of a test.
#[derive(Clone, Debug)]
pub struct ImageTool<'a> {
    /// The path to the image tool.
    pub path: &'a Utf8Path,

    /// How the tool is executed: in the test directory, without a timeout.
    pub exec: ExecOptions<'a>,
}

impl ImageTool<'_> {
    /// Returns the layout of `image`. Falls back to plain RGBA if the tool can't describe it.
    pub fn image_info(&self, image: &Utf8Path) -> ImageInfo {
        let outcome = self.run(vec![
            "-v".to_owned(),
            "--info".to_owned(),
            "--wildcardoff".to_owned(),
            image.to_string(),
        ]);
        if !outcome.status.is_ok() {
            debug!("image tool couldn't describe {image}, assuming RGBA");
            return ImageInfo::default();
        }
        ImageInfo::parse(&outcome.output).unwrap_or_default()
    }

    /// Performs one comparison, appending the tool's output to the diff log at `log_path`.
    ///
    /// `pass_status` holds the status of every pass that ran and `infos` the layout of every
    /// pass's reference image.
    pub fn compare(
        &self,
        check: &DiffCheck,
        images: &ImageSet,
        infos: &IndexMap<String, ImageInfo>,
        pass_status: &IndexMap<String, TestStatus>,
        thresholds: &DiffThresholds,
        log_path: &Utf8Path,
    ) -> io::Result<DiffDecision> {
        let producers_ok = check
            .producing_passes()
            .all(|pass| pass_status.get(pass).is_some_and(|status| status.is_ok()));
        if !producers_ok {
            debug!("skipping diff {check}: a pass producing its images didn't succeed");
            return Ok(DiffDecision::Skipped);
        }
        let (Some(out), Some(reference)) = (images.get(&check.out), images.get(&check.reference))
        else {
            debug!("skipping diff {check}: missing image");
            return Ok(DiffDecision::Skipped);
        };

        let info = comparison_info(check, infos);
        let args = diff_args(thresholds, out, reference, &info, &check.diff_image_name());
        let outcome = self.run(args);

        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        writeln!(log, "DIFF {}", check.log_key())?;
        writeln!(log, "{}", outcome.output.join("\n"))?;
        log.flush()?;

        Ok(if outcome.status.is_ok() {
            DiffDecision::Passed
        } else {
            DiffDecision::Errored {
                hard_fail: check.is_hard_fail(),
            }
        })
    }

    /// Writes a PNG thumbnail of `image` named `output`. Returns false if the tool failed.
    pub fn thumbnail(&self, image: &Utf8Path, info: &ImageInfo, output: &str) -> bool {
        let mut args = vec!["--threads".to_owned(), "1".to_owned(), "--wildcardoff".to_owned()];
        args.push(image.to_string());
        if info.is_deep {
            args.push("--flatten".to_owned());
        }
        args.extend(["--ch".to_owned(), info.channels.clone()]);
        args.extend(["-o".to_owned(), output.to_owned()]);
        self.run(args).status.is_ok()
    }

    fn run(&self, args: Vec<String>) -> CommandOutcome {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.path.to_string());
        argv.extend(args);
        run_command(&argv, &self.exec)
    }
}

/// Returns the file name of the thumbnail for an image slot, e.g. `out.usd.png`.
pub fn thumbnail_name(slot: &ImageSlot) -> String {
    format!("{}.{}.png", slot.kind, slot.pass)
}

/// Returns the layout used to compare the images of `check`: the channels of the output pass,
/// flattened if either image is deep.
fn comparison_info(check: &DiffCheck, infos: &IndexMap<String, ImageInfo>) -> ImageInfo {
    let mut info = infos.get(&check.out.pass).cloned().unwrap_or_default();
    info.is_deep |= infos
        .get(&check.reference.pass)
        .is_some_and(|reference| reference.is_deep);
    info
}

fn diff_args(
    thresholds: &DiffThresholds,
    out: &Utf8Path,
    reference: &Utf8Path,
    info: &ImageInfo,
    diff_image: &str,
) -> Vec<String> {
    let mut args: Vec<String> = ["--threads", "1", "-a"].map(str::to_owned).into();
    args.extend(thresholds.to_args());
    // Paths may contain `#` or `@`, which would otherwise be expanded.
    args.push("--wildcardoff".to_owned());
    args.extend(["--diff".to_owned(), out.to_string(), reference.to_string()]);
    if info.is_deep {
        args.extend(["--flatten", "--swap", "--flatten", "--swap"].map(str::to_owned));
    }
    // The difference image is abs(out - ref) * 8, composited over its own alpha.
    let (channels, alpha) = (&info.channels, &info.alpha);
    args.extend(
        [
            "--sub".to_owned(),
            "--abs".to_owned(),
            "--cmul".to_owned(),
            "8".to_owned(),
            "-ch".to_owned(),
            format!("{channels},{alpha}"),
            "--dup".to_owned(),
            "--ch".to_owned(),
            format!("{alpha},{alpha},{alpha},0"),
            "--add".to_owned(),
            "-ch".to_owned(),
            "0,1,2".to_owned(),
            "--subimage".to_owned(),
            "0".to_owned(),
            "-o".to_owned(),
            diff_image.to_owned(),
        ],
    );
    args
}

/// Splits a diff log into the output of each comparison, keyed by [`DiffCheck::log_key`].
///
/// A block starts at its `DIFF <key>` header and ends at the first line starting with `PASS`,
/// `FAILURE` or `WARNING`. Blocks that never reach such a line are dropped.
pub fn diff_log_excerpts(contents: &str) -> IndexMap<String, String> {
    let mut excerpts = IndexMap::new();
    let mut current_key = String::new();
    let mut current = String::new();
    for line in contents.split_inclusive('\n') {
        if let Some(key) = line.strip_prefix("DIFF ") {
            current_key = key.trim_end().to_owned();
            continue;
        }
        current.push_str(line);
        if ["PASS", "FAILURE", "WARNING"]
            .iter()
            .any(|verdict| line.starts_with(verdict))
        {
            excerpts.insert(std::mem::take(&mut current_key), std::mem::take(&mut current));
        }
    }
    excerpts
}

/// Returns the slot of the output image of `pass`.
pub fn out_slot(pass: &str) -> ImageSlot {
    ImageSlot::new(pass, ImageKind::Out)
}

/// Returns the slot of the reference image of `pass`.
pub fn ref_slot(pass: &str) -> ImageSlot {
    ImageSlot::new(pass, ImageKind::Ref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_owned).collect()
    }

    #[test]
    fn thresholds_as_flags() {
        let args = DiffThresholds::default().to_args();
        assert_eq!(
            args,
            [
                "--hardfail",
                "0.0157",
                "--fail",
                "0.00001",
                "--failpercent",
                "33.334",
                "--warnpercent",
                "0"
            ]
        );
    }

    #[test]
    fn info_plain_rgba() {
        let output = lines(indoc! {"
            Reading ref/reference.exr
            ref/reference.exr :  160 x  120, 4 channel, half openexr
                channel list: R, G, B, A
        "});
        assert_eq!(ImageInfo::parse(&output), Some(ImageInfo::default()));
    }

    #[test]
    fn info_deep_with_subimages() {
        let output = lines(indoc! {"
            Reading ref/reference.exr
            ref/reference.exr :  160 x  120, 5 channel, deep float openexr
                2 subimages: 160x120 [f,f,f,f,f], 160x120 [f,f,f,f,f]
                channel list: Z, diffuse.R, diffuse.G, diffuse.B, AR, diffuse.A
        "});
        let info = ImageInfo::parse(&output).unwrap();
        assert!(info.is_deep);
        assert_eq!(info.channels, "diffuse.R,diffuse.G,diffuse.B");
        assert_eq!(info.alpha, "diffuse.A");
    }

    #[test]
    fn info_without_color_channels() {
        let output = lines(indoc! {"
            Reading depth.exr
            depth.exr :  160 x  120, 1 channel, float openexr
                channel list: Z (float)
        "});
        let info = ImageInfo::parse(&output).unwrap();
        assert!(!info.is_deep);
        assert_eq!(info.channels, "0,0,0");
        assert_eq!(info.alpha, "A");

        assert_eq!(ImageInfo::parse(&lines("just one line")), None);
    }

    #[test]
    fn diff_arguments() {
        let info = ImageInfo {
            is_deep: true,
            ..ImageInfo::default()
        };
        let args = diff_args(
            &DiffThresholds::default(),
            Utf8Path::new("testrender.usd.tif"),
            Utf8Path::new("/src/test_0001/ref/reference.tif"),
            &info,
            "dif.ousd-rusd.png",
        );
        let joined = args.join(" ");
        assert!(joined.starts_with("--threads 1 -a --hardfail 0.0157"), "{joined}");
        assert!(
            joined.contains(
                "--wildcardoff --diff testrender.usd.tif /src/test_0001/ref/reference.tif \
                 --flatten --swap --flatten --swap --sub --abs --cmul 8 -ch R,G,B,A"
            ),
            "{joined}"
        );
        assert!(joined.ends_with("--subimage 0 -o dif.ousd-rusd.png"), "{joined}");
    }

    #[test]
    fn deep_reference_is_flattened() {
        let infos: IndexMap<String, ImageInfo> = [
            ("usd".to_owned(), ImageInfo::default()),
            (
                "hydra".to_owned(),
                ImageInfo {
                    is_deep: true,
                    ..ImageInfo::default()
                },
            ),
        ]
        .into_iter()
        .collect();

        let cross: DiffCheck = "usd:out-hydra:ref".parse().unwrap();
        let info = comparison_info(&cross, &infos);
        assert!(info.is_deep);
        assert_eq!(info.channels, "R,G,B");
        let args = diff_args(
            &DiffThresholds::default(),
            Utf8Path::new("testrender.usd.tif"),
            Utf8Path::new("ref/reference.hydra.exr"),
            &info,
            &cross.diff_image_name(),
        );
        assert!(args.iter().any(|arg| arg == "--flatten"), "{args:?}");

        assert!(comparison_info(&DiffCheck::same_pass("hydra"), &infos).is_deep);
        assert!(!comparison_info(&DiffCheck::same_pass("usd"), &infos).is_deep);
        assert!(!comparison_info(&DiffCheck::same_pass("vulkan"), &infos).is_deep);
    }

    #[test]
    fn excerpts() {
        let log = indoc! {"
            DIFF usd_out-usd_ref
            Computing diff of \"a\" vs \"b\"
              Mean error = 0
            PASS
            DIFF hydra_out-hydra_ref
            Computing diff of \"c\" vs \"d\"
            FAILURE
            DIFF hydra_out-usd_ref
            incomplete block
        "};
        let excerpts = diff_log_excerpts(log);
        assert_eq!(
            excerpts.keys().collect::<Vec<_>>(),
            ["usd_out-usd_ref", "hydra_out-hydra_ref"]
        );
        assert_eq!(
            excerpts["usd_out-usd_ref"],
            "Computing diff of \"a\" vs \"b\"\n  Mean error = 0\nPASS\n"
        );
    }

    #[test]
    fn decisions() {
        assert!(DiffDecision::Errored { hard_fail: true }.fails_test());
        assert!(!DiffDecision::Errored { hard_fail: false }.fails_test());
        assert!(!DiffDecision::Skipped.fails_test());
        assert_eq!(thumbnail_name(&out_slot("usd")), "out.usd.png");
        assert_eq!(thumbnail_name(&ref_slot("hydra")), "ref.hydra.png");
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use pretty_assertions::assert_eq;
        use camino_tempfile::tempdir;
        use std::os::unix::fs::PermissionsExt;

        // A stand-in image tool: diffs fail when either image contains "bad".
        const FAKE_TOOL: &str = indoc! {r#"
            #!/bin/sh
            while [ $# -gt 0 ]; do
                if [ "$1" = "--diff" ]; then
                    echo "Computing diff of \"$2\" vs \"$3\""
                    if grep -q bad "$2" "$3"; then echo "FAILURE"; exit 1; fi
                    echo "PASS"
                    exit 0
                fi
                shift
            done
            exit 0
        "#};

        #[test]
        fn compare_is_repeatable() {
            let dir = tempdir().unwrap();
            let tool = dir.path().join("oiiotool");
            std::fs::write(&tool, FAKE_TOOL).unwrap();
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
            std::fs::write(dir.path().join("out.tif"), "good").unwrap();
            std::fs::write(dir.path().join("ref.tif"), "good").unwrap();
            std::fs::write(dir.path().join("other.tif"), "bad").unwrap();

            let env: IndexMap<String, String> =
                [("PATH".to_owned(), std::env::var("PATH").unwrap_or_default())]
                    .into_iter()
                    .collect();
            let image_tool = ImageTool {
                path: &tool,
                exec: ExecOptions {
                    cwd: dir.path(),
                    env: &env,
                    timeout: None,
                    grace_period: std::time::Duration::ZERO,
                    echo: false,
                },
            };
            let mut images = ImageSet::new();
            images.insert(out_slot("usd"), dir.path().join("out.tif"));
            images.insert(ref_slot("usd"), dir.path().join("ref.tif"));
            images.insert(out_slot("hydra"), dir.path().join("other.tif"));
            let status: IndexMap<String, TestStatus> = [
                ("usd".to_owned(), TestStatus::Ok),
                ("hydra".to_owned(), TestStatus::Ok),
            ]
            .into_iter()
            .collect();
            let log = dir.path().join("test_0001.diff.log");
            let compare = |check: &DiffCheck| {
                image_tool
                    .compare(
                        check,
                        &images,
                        &IndexMap::new(),
                        &status,
                        &DiffThresholds::default(),
                        &log,
                    )
                    .unwrap()
            };

            let same = DiffCheck::same_pass("usd");
            assert_eq!(compare(&same), DiffDecision::Passed);
            assert_eq!(compare(&same), DiffDecision::Passed);

            let cross: DiffCheck = "hydra:out-usd:ref".parse().unwrap();
            assert_eq!(compare(&cross), DiffDecision::Errored { hard_fail: false });

            // hydra has no reference.
            assert_eq!(
                compare(&DiffCheck::same_pass("hydra")),
                DiffDecision::Skipped
            );

            let excerpts = diff_log_excerpts(&std::fs::read_to_string(&log).unwrap());
            assert_eq!(
                excerpts.keys().collect::<Vec<_>>(),
                ["usd_out-usd_ref", "hydra_out-usd_ref"]
            );
        }
    }
}
