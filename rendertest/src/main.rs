// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use color_eyre::Result;
use rendertest::RendertestApp;

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = enable_ansi_support::enable_ansi_support();

    let opts = RendertestApp::parse();
    let output = opts.init_output();

    match opts.exec(output) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr(&output.stderr_styles());
            std::process::exit(error.process_exit_code())
        }
    }
}
