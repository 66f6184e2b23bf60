//! Terminal spinner for the deliberate waits of a run: the pause before
//! paced portal calls and captcha solving.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(120);
const TEMPLATE: &str = "{spinner:.cyan} {msg} [{elapsed}]";

/// Spinner on stderr for as long as the value lives.
///
/// Disabled spinners, and enabled ones when stderr is not a terminal, draw
/// nothing.
pub struct WaitSpinner {
    bar: ProgressBar,
}

impl WaitSpinner {
    pub fn start(enabled: bool, message: impl Into<String>) -> Self {
        let bar = if enabled {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr())
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::with_template(TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.into());
        if enabled {
            bar.enable_steady_tick(TICK);
        }
        Self { bar }
    }

    pub fn message(&self) -> String {
        self.bar.message()
    }

    pub fn is_hidden(&self) -> bool {
        self.bar.is_hidden()
    }
}

impl Drop for WaitSpinner {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}
