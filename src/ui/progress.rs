use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Named progress bars sharing one terminal area.
pub struct ProgressManager {
    mp: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            mp: MultiProgress::new(),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn bars(&self) -> Result<MutexGuard<'_, HashMap<String, ProgressBar>>, String> {
        self.bars
            .lock()
            .map_err(|e| format!("Lock error: {}", e))
    }

    fn with_bar(&self, id: &str, f: impl FnOnce(&ProgressBar)) -> Result<(), String> {
        let bars = self.bars()?;
        let pb = bars
            .get(id)
            .ok_or_else(|| format!("Progress bar '{}' not found", id))?;
        f(pb);
        Ok(())
    }

    /// - `id`: unique name of the bar
    /// - `total`: length, may grow later through [`Self::increase_length`]
    /// - `template`: one of [`templates`]
    pub fn create_bar(
        &self,
        id: &str,
        total: u64,
        template: &str,
        message: &str,
    ) -> Result<(), String> {
        let mut bars = self.bars()?;
        if bars.contains_key(id) {
            return Err(format!("Progress bar '{}' already exists", id));
        }

        let style = ProgressStyle::default_bar()
            .template(template)
            .map_err(|e| format!("Bad template for '{}': {}", id, e))?
            .progress_chars("█▉▊▋▌▍▎▏ ");
        let pb = self.mp.add(ProgressBar::new(total));
        pb.set_style(style);
        pb.set_message(message.to_string());

        bars.insert(id.to_string(), pb);
        Ok(())
    }

    pub fn increase_length(&self, id: &str, step: u64) -> Result<(), String> {
        self.with_bar(id, |pb| pb.set_length(pb.length().unwrap_or_default() + step))
    }

    pub fn inc(&self, id: &str, value: u64) -> Result<(), String> {
        self.with_bar(id, |pb| pb.inc(value))
    }

    pub fn set_message(&self, id: &str, message: &str) -> Result<(), String> {
        self.with_bar(id, |pb| pb.set_message(message.to_string()))
    }

    /// Finishes the bar and keeps it on screen.
    pub fn finish(&self, id: &str, message: &str) -> Result<(), String> {
        self.with_bar(id, |pb| pb.finish_with_message(message.to_string()))
    }

    pub fn position(&self, id: &str) -> Result<u64, String> {
        let mut position = 0;
        self.with_bar(id, |pb| position = pb.position())?;
        Ok(position)
    }

    pub fn finish_all(&self) {
        if let Ok(mut bars) = self.bars.lock() {
            for (_, pb) in bars.drain() {
                pb.finish();
            }
        }
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

pub mod templates {
    pub const SENDER: &str =
        "\u{f048a} SEND [{bar:30.cyan}] {percent}% ({pos}/{len} bytes) {msg}";
    pub const RECEIVER: &str =
        "\u{f04e6} RECV [{bar:30.blue}] {pos} bytes in {elapsed} {msg}";
}
