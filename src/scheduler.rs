use crate::state::SourceError;

/// Tick counter for a single source.
///
/// A fresh cadence is due on its very first tick. After that it counts up once
/// per tick and becomes due again when the counter reaches `interval`, at which
/// point it resets. An interval of zero means "every tick".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    counter: u32,
    interval: u32,
}

impl Cadence {
    pub fn new(interval: u32) -> Self {
        Self {
            counter: interval,
            interval,
        }
    }

    #[cfg(test)]
    pub fn interval(&self) -> u32 {
        self.interval
    }

    #[cfg(test)]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Advances the cadence by one tick and reports whether the source is due.
    ///
    /// The reset happens here, not on a successful refresh, so a failing source
    /// retries at exactly the same rate as a healthy one.
    pub fn tick(&mut self) -> bool {
        if self.counter >= self.interval {
            self.counter = 0;
            true
        } else {
            self.counter += 1;
            false
        }
    }
}

/// Last known value of a source plus the cadence that decides when to re-sample it.
#[derive(Debug, Clone)]
pub struct RefreshableSource<T> {
    value: Option<T>,
    cadence: Cadence,
    last_error: Option<SourceError>,
}

impl<T> RefreshableSource<T> {
    pub fn new(interval_ticks: u32) -> Self {
        Self {
            value: None,
            cadence: Cadence::new(interval_ticks),
            last_error: None,
        }
    }

    pub fn tick(&mut self) -> bool {
        self.cadence.tick()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn set(&mut self, value: T) {
        self.value = Some(value);
        self.last_error = None;
    }

    /// Records a failed refresh; the previous value is carried forward.
    pub fn fail(&mut self, err: SourceError) {
        self.last_error = Some(err);
    }

    pub fn apply(&mut self, outcome: Result<T, SourceError>) {
        match outcome {
            Ok(value) => self.set(value),
            Err(err) => self.fail(err),
        }
    }

    pub fn last_error(&self) -> Option<&SourceError> {
        self.last_error.as_ref()
    }

    /// A value exists but the latest refresh of it failed.
    pub fn is_stale(&self) -> bool {
        self.value.is_some() && self.last_error.is_some()
    }

    #[cfg(test)]
    pub fn cadence(&self) -> Cadence {
        self.cadence
    }
}
