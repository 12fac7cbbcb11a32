use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use ftl_broker::{AccountId, Snapshot, SnapshotSource, SourceError, SourceResult};
use ftl_core::RawEntry;

/// Outcome a [`ScriptedSource`] hands out for one poll.
#[derive(Clone, Debug)]
pub enum ScriptedPoll {
    Snapshot(Vec<RawEntry>),
    Fail(String),
}

/// In-memory [`SnapshotSource`] replaying a fixed sequence per account.
///
/// Once an account's script is down to its last step that step repeats.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<AccountId, VecDeque<ScriptedPoll>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_script(self, account: impl Into<AccountId>, script: Vec<ScriptedPoll>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(account.into(), script.into());
        self
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_snapshot(&self, account: &AccountId) -> SourceResult<Snapshot> {
        let step = {
            let mut scripts = self
                .scripts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match scripts.get_mut(account) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().cloned(),
                None => None,
            }
        };
        match step {
            Some(ScriptedPoll::Snapshot(entries)) => Ok(Snapshot::new(entries)),
            Some(ScriptedPoll::Fail(reason)) => Err(SourceError::Transport(reason)),
            None => Ok(Snapshot::default()),
        }
    }
}
