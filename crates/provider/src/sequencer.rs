//! Operation sequencer
//!
//! Issues the remote calls a [`Delta`] implies, in the fixed order
//! remove, update, add. Failures are handled per [`Tier`]: mandatory
//! steps abort on the first error, best-effort steps are recorded as
//! warnings and the remaining items are still attempted.
//!
//! [`PowerBracket`] wraps mutations the control plane only accepts while
//! the resource is powered off.

use async_trait::async_trait;
use tracing::{debug, info};

use driftless_common::{Error, Keyed, Result};

use crate::diff::Delta;
use crate::warnings::Warnings;

/// Error policy for a batch of sub-operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Abort on first failure
    Mandatory,
    /// Record failures as warnings and continue
    BestEffort,
}

/// Remote calls for one keyed collection of one resource
#[async_trait]
pub trait CollectionOps<T: Keyed + Send + Sync>: Send + Sync {
    /// Short collection name used in operation labels, e.g. `"disk"`
    fn label(&self) -> &'static str;

    /// Human readable identity of an item
    fn describe(&self, item: &T) -> String;

    async fn add(&self, item: &T) -> Result<()>;

    async fn remove(&self, item: &T) -> Result<()>;

    /// Apply an in-place change. Collections without an update call fall
    /// back to remove followed by add.
    async fn update(&self, observed: &T, desired: &T) -> Result<()> {
        self.remove(observed).await?;
        self.add(desired).await
    }
}

/// Outcome counts of one [`apply`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub succeeded: usize,
    pub failed: usize,
}

enum Step<'a, T> {
    Remove(&'a T),
    Update(&'a T, &'a T),
    Add(&'a T),
}

/// Apply a delta through `ops`.
///
/// A cancelled convergence always aborts, whatever the tier.
pub async fn apply<T, O>(
    ops: &O,
    delta: &Delta<T>,
    tier: Tier,
    warnings: &mut Warnings,
) -> Result<Applied>
where
    T: Keyed + Send + Sync,
    O: CollectionOps<T> + ?Sized,
{
    let mut applied = Applied::default();
    if delta.is_empty() {
        return Ok(applied);
    }

    debug!(
        "Applying {} delta: {} remove, {} update, {} add",
        ops.label(),
        delta.to_remove.len(),
        delta.to_update.len(),
        delta.to_add.len()
    );

    let steps = delta
        .to_remove
        .iter()
        .map(Step::Remove)
        .chain(delta.to_update.iter().map(|(old, new)| Step::Update(old, new)))
        .chain(delta.to_add.iter().map(Step::Add));

    for step in steps {
        let (operation, outcome) = match step {
            Step::Remove(item) => (
                format!("{} remove {}", ops.label(), ops.describe(item)),
                ops.remove(item).await,
            ),
            Step::Update(old, new) => (
                format!("{} update {}", ops.label(), ops.describe(new)),
                ops.update(old, new).await,
            ),
            Step::Add(item) => (
                format!("{} add {}", ops.label(), ops.describe(item)),
                ops.add(item).await,
            ),
        };

        match outcome {
            Ok(()) => {
                debug!("{} done", operation);
                applied.succeeded += 1;
            }
            Err(err) if tier == Tier::BestEffort && !matches!(err, Error::Cancelled { .. }) => {
                warnings.push(operation, err);
                applied.failed += 1;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(applied)
}

/// Drop removals whose identity is re-added by the same delta, for
/// collections where an add overwrites the existing entry server-side.
pub fn elide_overwritten<T, K, F>(mut delta: Delta<T>, identity: F) -> Delta<T>
where
    K: PartialEq,
    F: Fn(&T) -> K,
{
    let added: Vec<K> = delta.to_add.iter().map(&identity).collect();
    delta.to_remove.retain(|item| !added.contains(&identity(item)));
    delta
}

/// Power control of a resource that supports stop and start
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn stop(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
}

/// Stop, mutate, restart
///
/// The resource is only stopped and restarted when it was running on
/// entry, so a resource that should stay stopped is never started.
pub struct PowerBracket<'a, P: PowerControl + ?Sized> {
    power: &'a P,
    was_running: bool,
}

impl<'a, P: PowerControl + ?Sized> PowerBracket<'a, P> {
    pub async fn enter(power: &'a P, was_running: bool) -> Result<PowerBracket<'a, P>> {
        if was_running {
            info!("Stopping resource for offline changes");
            power.stop().await?;
        } else {
            debug!("Resource already stopped, applying offline changes directly");
        }
        Ok(Self { power, was_running })
    }

    /// Leave the bracket, restarting when the resource was running.
    ///
    /// When the mutation failed the restart is still attempted; the
    /// mutation error is returned and a failed restart becomes a warning.
    pub async fn exit<T>(self, outcome: Result<T>, warnings: &mut Warnings) -> Result<T> {
        if !self.was_running {
            return outcome;
        }

        info!("Restarting resource after offline changes");
        let restarted = self.power.start().await;
        match (outcome, restarted) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restart)) => {
                warnings.push("restart after failed offline change", restart);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use driftless_common::Tag;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
        failing: Vec<String>,
    }

    impl Recorder {
        fn failing(keys: &[&str]) -> Self {
            Self {
                log: Mutex::new(Vec::new()),
                failing: keys.iter().map(|k| k.to_string()).collect(),
            }
        }

        fn record(&self, entry: String, key: &str) -> Result<()> {
            self.log.lock().push(entry);
            if self.failing.iter().any(|k| k == key) {
                return Err(Error::remote("tag", format!("{} rejected", key)));
            }
            Ok(())
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl CollectionOps<Tag> for Recorder {
        fn label(&self) -> &'static str {
            "tag"
        }

        fn describe(&self, item: &Tag) -> String {
            format!("{}={}", item.key, item.value)
        }

        async fn add(&self, item: &Tag) -> Result<()> {
            self.record(format!("add {}", self.describe(item)), &item.key)
        }

        async fn remove(&self, item: &Tag) -> Result<()> {
            self.record(format!("remove {}", self.describe(item)), &item.key)
        }
    }

    #[derive(Default)]
    struct Switch {
        log: Mutex<Vec<&'static str>>,
        fail_start: bool,
    }

    #[async_trait]
    impl PowerControl for Switch {
        async fn stop(&self) -> Result<()> {
            self.log.lock().push("stop");
            Ok(())
        }

        async fn start(&self) -> Result<()> {
            self.log.lock().push("start");
            if self.fail_start {
                return Err(Error::remote("start", "no capacity"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_remove_before_add() {
        let ops = Recorder::default();
        let delta = diff(
            &[Tag::new("a", "1"), Tag::new("c", "3")],
            &[Tag::new("b", "2")],
        );
        let mut warnings = Warnings::new();

        let applied = apply(&ops, &delta, Tier::Mandatory, &mut warnings)
            .await
            .unwrap();

        assert_eq!(ops.log(), vec!["remove b=2", "add a=1", "add c=3"]);
        assert_eq!(applied, Applied { succeeded: 3, failed: 0 });
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_best_effort_continues_past_failures() {
        let ops = Recorder::failing(&["a"]);
        let delta = diff(&[Tag::new("a", "1"), Tag::new("b", "2")], &[]);
        let mut warnings = Warnings::new();

        let applied = apply(&ops, &delta, Tier::BestEffort, &mut warnings)
            .await
            .unwrap();

        assert_eq!(ops.log(), vec!["add a=1", "add b=2"]);
        assert_eq!(applied, Applied { succeeded: 1, failed: 1 });
        assert_eq!(warnings.operations(), vec!["tag add a=1"]);
    }

    #[tokio::test]
    async fn test_mandatory_aborts_on_first_failure() {
        let ops = Recorder::failing(&["a"]);
        let delta = diff(&[Tag::new("a", "1"), Tag::new("b", "2")], &[]);
        let mut warnings = Warnings::new();

        let err = apply(&ops, &delta, Tier::Mandatory, &mut warnings)
            .await
            .unwrap_err();

        assert!(err.is_remote());
        assert_eq!(ops.log(), vec!["add a=1"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_elide_overwritten_tag_removal() {
        let delta = diff(
            &[Tag::new("env", "prod"), Tag::new("team", "core")],
            &[Tag::new("env", "dev"), Tag::new("old", "x")],
        );
        let delta = elide_overwritten(delta, |tag: &Tag| tag.key.clone());

        assert_eq!(delta.to_remove, vec![Tag::new("old", "x")]);
        assert_eq!(
            delta.to_add,
            vec![Tag::new("env", "prod"), Tag::new("team", "core")]
        );
    }

    #[tokio::test]
    async fn test_bracket_restarts_only_when_running() {
        let running = Switch::default();
        let mut warnings = Warnings::new();
        let bracket = PowerBracket::enter(&running, true).await.unwrap();
        bracket.exit(Ok(()), &mut warnings).await.unwrap();
        assert_eq!(*running.log.lock(), vec!["stop", "start"]);

        let stopped = Switch::default();
        let bracket = PowerBracket::enter(&stopped, false).await.unwrap();
        bracket.exit(Ok(()), &mut warnings).await.unwrap();
        assert!(stopped.log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_bracket_restarts_after_failed_mutation() {
        let power = Switch {
            fail_start: true,
            ..Switch::default()
        };
        let mut warnings = Warnings::new();

        let bracket = PowerBracket::enter(&power, true).await.unwrap();
        let err = bracket
            .exit::<()>(Err(Error::remote("netAttach", "busy")), &mut warnings)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RemoteCall { ref operation, .. } if operation == "netAttach"));
        assert_eq!(*power.log.lock(), vec!["stop", "start"]);
        assert_eq!(warnings.len(), 1);
    }
}
