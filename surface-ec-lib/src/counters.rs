use crate::error::ECError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the counter state kept next to the executable
pub const COUNTERS_FILE_NAME: &str = ".counters.json";

/// The two rolling counters the EC expects to keep increasing across runs.
///
/// `seq` correlates frames with their acknowledgements, `cnt` is echoed back in
/// the response and ties it to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequenceState {
    pub seq: u8,
    pub cnt: u16,
}

impl SequenceState {
    pub fn new(seq: u8, cnt: u16) -> Self {
        Self { seq, cnt }
    }

    /// Move both counters on by one, wrapping at their width.
    pub fn advance(&mut self) {
        self.seq = self.seq.wrapping_add(1);
        self.cnt = self.cnt.wrapping_add(1);
    }

    pub fn load(store: &CounterStore) -> Result<Self, ECError> {
        store.load()
    }

    pub fn save(&self, store: &CounterStore) -> Result<(), ECError> {
        store.save(self)
    }
}

/// JSON file holding a [`SequenceState`] between invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterStore {
    path: PathBuf,
}

impl CounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store colocated with the running executable.
    pub fn beside_executable() -> Result<Self, ECError> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::new(dir.join(COUNTERS_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored counters, starting from zero if nothing was stored yet.
    pub fn load(&self) -> Result<SequenceState, ECError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored counters, starting from zero");
                return Ok(SequenceState::default());
            }
            Err(e) => return Err(e.into()),
        };
        let state: SequenceState = serde_json::from_str(&data)?;
        debug!(path = %self.path.display(), seq = state.seq, cnt = state.cnt, "Loaded counters");
        Ok(state)
    }

    pub fn save(&self, state: &SequenceState) -> Result<(), ECError> {
        fs::write(&self.path, serde_json::to_string(state)?)?;
        debug!(path = %self.path.display(), seq = state.seq, cnt = state.cnt, "Stored counters");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_wraps_after_256() {
        let mut state = SequenceState::new(7, 0);
        for _ in 0..256 {
            state.advance();
        }
        assert_eq!(state.seq, 7);
        assert_eq!(state.cnt, 256);
    }

    #[test]
    fn cnt_wraps_after_65536() {
        let start = SequenceState::new(0xFE, 0x1234);
        let mut state = start;
        for _ in 0..65536 {
            state.advance();
        }
        assert_eq!(state, start);
    }

    #[test]
    fn advance_wraps_at_max() {
        let mut state = SequenceState::new(0xFF, 0xFFFF);
        state.advance();
        assert_eq!(state, SequenceState::new(0, 0));
    }

    #[test]
    fn json_shape() {
        let json = serde_json::to_string(&SequenceState::new(3, 513)).unwrap();
        assert_eq!(json, r#"{"seq":3,"cnt":513}"#);
    }
}
