use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over one fan-out phase, ticking once per completed participant.
pub(crate) fn phase_progress(label: &str, total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{msg} {spinner:.green} [{wide_bar:.cyan/blue}] {pos}/{len}")
            .expect("Failed to set progress style")
            .progress_chars("#>-"),
    );
    pb.set_message(label.to_string());
    pb
}
