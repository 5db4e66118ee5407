// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::process::exit;

use structopt::StructOpt;

use span_peaks::cli::{log_level, run, shared_opt, Span};

pub fn main() {
    let opt = Span::from_args();
    let shared = shared_opt(&opt);

    let mut dispatch = fern::Dispatch::new()
        .level(log_level(shared.debug, shared.quiet))
        .chain(std::io::stderr());
    if let Some(log_path) = &shared.log {
        match fern::log_file(log_path) {
            Ok(file) => dispatch = dispatch.chain(file),
            Err(e) => eprintln!("warning: could not open log file {:?}: {}", log_path, e),
        }
    }
    dispatch.apply().unwrap();

    exit(match run(opt) {
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
        _ => 0,
    })
}
