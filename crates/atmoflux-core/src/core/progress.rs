/// Progress events emitted by long-running workflows.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    pub fn phase_start(&self, name: &'static str) {
        self.report(Progress::PhaseStart { name });
    }

    pub fn phase_finish(&self) {
        self.report(Progress::PhaseFinish);
    }

    pub fn task_start(&self, total_steps: u64) {
        self.report(Progress::TaskStart { total_steps });
    }

    pub fn task_increment(&self) {
        self.report(Progress::TaskIncrement);
    }

    pub fn task_finish(&self) {
        self.report(Progress::TaskFinish);
    }

    pub fn message(&self, text: impl Into<String>) {
        self.report(Progress::Message(text.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn callback_receives_events_in_order() {
        let seen = Mutex::new(Vec::new());
        {
            let reporter = ProgressReporter::with_callback(Box::new(|e| {
                seen.lock().unwrap().push(e);
            }));
            reporter.phase_start("Loading tables");
            reporter.task_start(2);
            reporter.task_increment();
            reporter.message("halfway");
            reporter.phase_finish();
        }
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], Progress::PhaseStart { name: "Loading tables" });
        assert_eq!(seen[3], Progress::Message("halfway".into()));
    }

    #[test]
    fn reporter_without_callback_is_silent() {
        ProgressReporter::new().task_finish();
    }
}
