//! Reactive actions

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::datum::Datum;
use crate::error::{ReactiveError, ReactiveResult};
use crate::value::SettableRef;

/// Something that can be triggered
pub trait ObservableAction: Send + Sync + fmt::Debug {
    /// Run the action
    fn act(&self) -> ReactiveResult<()>;

    /// `None` if the action can run now, else the reason it cannot
    fn is_enabled(&self) -> Option<String> {
        None
    }

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to an action
pub type ActionRef = Arc<dyn ObservableAction>;

/// Body of a closure action
pub type ActFn = Arc<dyn Fn() -> ReactiveResult<()> + Send + Sync>;

fn message_of(value: &SettableRef) -> Option<String> {
    match value.get() {
        Datum::Null => None,
        other => Some(other.to_string()),
    }
}

/// An action backed by a closure
pub struct FnAction {
    act: ActFn,
    enabled: Option<SettableRef>,
}

impl FnAction {
    /// Action running `act`
    pub fn new(act: ActFn) -> Self {
        Self { act, enabled: None }
    }

    /// Disable the action while `message` holds a non-null message
    pub fn with_enablement(mut self, message: SettableRef) -> Self {
        self.enabled = Some(message);
        self
    }
}

impl ObservableAction for FnAction {
    fn act(&self) -> ReactiveResult<()> {
        if let Some(message) = self.is_enabled() {
            return Err(ReactiveError::Rejected(message));
        }
        (self.act)()
    }

    fn is_enabled(&self) -> Option<String> {
        self.enabled.as_ref().and_then(message_of)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for FnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction")
            .field("enabled", &self.is_enabled().is_none())
            .finish()
    }
}

/// An action disabled whenever a message value is non-null
#[derive(Debug)]
pub struct DisabledAction {
    source: ActionRef,
    disablement: SettableRef,
}

impl DisabledAction {
    /// Disable `source` with the message held by `disablement`
    pub fn new(source: ActionRef, disablement: SettableRef) -> Self {
        Self {
            source,
            disablement,
        }
    }

    /// The disabled action
    pub fn source(&self) -> &ActionRef {
        &self.source
    }

    /// The value holding the disablement message
    pub fn disablement(&self) -> &SettableRef {
        &self.disablement
    }
}

impl ObservableAction for DisabledAction {
    fn act(&self) -> ReactiveResult<()> {
        if let Some(message) = self.is_enabled() {
            return Err(ReactiveError::Rejected(message));
        }
        self.source.act()
    }

    fn is_enabled(&self) -> Option<String> {
        message_of(&self.disablement).or_else(|| self.source.is_enabled())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Runs several actions in order, stopping at the first failure
#[derive(Debug)]
pub struct SequenceAction {
    actions: Vec<ActionRef>,
}

impl SequenceAction {
    /// Sequence `actions`
    pub fn new(actions: Vec<ActionRef>) -> Self {
        Self { actions }
    }

    /// The sequenced actions
    pub fn actions(&self) -> &[ActionRef] {
        &self.actions
    }
}

impl ObservableAction for SequenceAction {
    fn act(&self) -> ReactiveResult<()> {
        for action in &self.actions {
            action.act()?;
        }
        Ok(())
    }

    fn is_enabled(&self) -> Option<String> {
        self.actions.iter().find_map(|a| a.is_enabled())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{SettableValue, SimpleValue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Arc<AtomicUsize>, ActionRef) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let action = FnAction::new(Arc::new(move || -> ReactiveResult<()> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        (count, Arc::new(action))
    }

    #[test]
    fn test_disabled_action_blocks() {
        let (count, action) = counting();
        let message = Arc::new(SimpleValue::new(Datum::text("Busy")));
        let disabled = DisabledAction::new(action, message.clone());
        assert_eq!(disabled.act(), Err(ReactiveError::rejected("Busy")));
        message.set(Datum::Null).unwrap();
        disabled.act().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sequence_runs_in_order() {
        let (first, a) = counting();
        let (second, b) = counting();
        let sequence = SequenceAction::new(vec![a, b]);
        sequence.act().unwrap();
        sequence.act().unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }
}
