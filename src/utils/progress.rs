//! Progress bars over mini-batches

use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str =
    "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})";

/// Bar with the crate-wide style, labelled with `msg`
pub fn batch_progress(len: usize, msg: impl Into<String>) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(TEMPLATE)
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    let pb = ProgressBar::new(len as u64);
    pb.set_style(style);
    pb.set_message(msg.into());
    pb
}
