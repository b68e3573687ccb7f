//! Hooks for front-ends that display progress.
//!
//! Long-running operations call a [`Reporter`] once per archive entry or per asset file.
//! Use `()` when nothing should be reported; messages are also emitted through the
//! [`log`] facade regardless of the reporter.

pub trait Reporter {
    /// A human-readable status line.
    fn log(&mut self, message: &str) {
        let _ = message;
    }

    /// Completed fraction of the current operation, in `0.0..=1.0`.
    fn progress(&mut self, fraction: f32) {
        let _ = fraction;
    }
}

impl Reporter for () {}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn log(&mut self, message: &str) {
        (**self).log(message);
    }

    fn progress(&mut self, fraction: f32) {
        (**self).progress(fraction);
    }
}

pub(crate) fn fraction(done: usize, total: usize) -> f32 {
    if total == 0 {
        1.0
    } else {
        done as f32 / total as f32
    }
}
