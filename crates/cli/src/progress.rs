//! Cargo-style progress output for hashmirror
//!
//! Displays progress in the familiar cargo format:
//! ```text
//!    Scanning source /data
//!    Scanning backup /mnt/backup/data
//!     Planned 3 files (1.20 MiB), 948 unchanged
//!     Copying [===========>             ] 2/3 photos/img_0042.jpg
//!      Copied 3 files in 1.42s
//! ```

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use hashmirror_core::{CopyOutcome, PassObserver, PassReport, TreeId, WorkItem, Worklist};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;

/// Every bar is drawn through this so log lines can be interleaved cleanly
static BARS: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const SCANNING: &str = "Scanning";
    const PLANNED: &str = "Planned";
    const COPYING: &str = "Copying";
    const COPIED: &str = "Copied";
    const UP_TO_DATE: &str = "Up to date";
}

/// Print a cargo-style status line
pub fn print_status(status: &str, message: &str) {
    let style = console::Style::new().green().bold();
    let line = format!("{:>12} {}", style.apply_to(status), message);
    BARS.suspend(|| {
        let _ = writeln!(console::Term::stderr(), "{line}");
    });
}

fn format_elapsed(start: Instant) -> String {
    let elapsed = start.elapsed();
    if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

/// Progress tracker for one backup pass
pub struct PassProgress {
    start: Instant,
    source_root: PathBuf,
    dry_run: bool,
    bar: Option<ProgressBar>,
}

impl PassProgress {
    pub fn new(source_root: &Path, dry_run: bool) -> Self {
        Self {
            start: Instant::now(),
            source_root: source_root.to_path_buf(),
            dry_run,
            bar: None,
        }
    }

    fn planned_bytes(&self, worklist: &Worklist) -> u64 {
        worklist
            .paths()
            .filter_map(|path| std::fs::metadata(self.source_root.join(path)).ok())
            .map(|meta| meta.len())
            .sum()
    }

    fn copy_bar(total_files: u64) -> ProgressBar {
        let pb = BARS.add(ProgressBar::new(total_files));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} {msg:>12} [{bar:25.cyan/dim}] {pos}/{len} {prefix:.dim}",
                )
                .expect("valid template")
                .progress_chars("=> "),
        );
        pb.set_message(Status::COPYING);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }

    /// Show final summary
    pub fn finish(&mut self, report: &PassReport) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        let elapsed = format_elapsed(self.start);

        if report.dry_run {
            return;
        }
        if report.worklist.is_empty() {
            print_status(
                Status::UP_TO_DATE,
                &format!("{} files checked in {elapsed}", report.worklist.unchanged),
            );
            return;
        }

        let problems = report.skipped + report.failed;
        if problems == 0 {
            print_status(
                Status::COPIED,
                &format!("{} files in {elapsed}", report.copied()),
            );
        } else {
            let style = console::Style::new().yellow().bold();
            let _ = writeln!(
                console::Term::stderr(),
                "{:>12} {} copied, {} skipped, {} failed in {}",
                style.apply_to("Finished"),
                report.copied(),
                report.skipped,
                report.failed,
                elapsed
            );
        }
    }
}

impl PassObserver for PassProgress {
    fn scanning(&mut self, tree: TreeId, root: &Path) {
        print_status(Status::SCANNING, &format!("{tree} {}", root.display()));
    }

    fn planned(&mut self, worklist: &Worklist) {
        let size = humansize::format_size(self.planned_bytes(worklist), humansize::BINARY);
        print_status(
            Status::PLANNED,
            &format!(
                "{} files ({size}), {} unchanged",
                worklist.len(),
                worklist.unchanged
            ),
        );
        // A dry run copies nothing, so there is no bar to advance
        if !self.dry_run && !worklist.is_empty() {
            self.bar = Some(Self::copy_bar(worklist.len() as u64));
        }
    }

    fn copied(&mut self, item: &WorkItem, _outcome: &CopyOutcome) {
        if let Some(bar) = &self.bar {
            bar.set_prefix(item.path.clone());
            bar.inc(1);
        }
    }
}

/// Tracing writer that pauses the progress bars while a line is printed
#[derive(Clone, Copy)]
pub struct ProgressWriter;

impl<'a> MakeWriter<'a> for ProgressWriter {
    type Writer = ProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

impl io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BARS.suspend(|| io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}
