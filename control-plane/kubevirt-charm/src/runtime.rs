//! Runs one dispatched hook or action, replaying deferred events first.

use tracing::{debug, info, instrument};

use crate::engine::{ConvergenceEngine, Dispatch, EngineError, Event, Outcome};

/// Replay the deferred queue, then hand `dispatch` to the engine.
/// Events that defer again stay queued in their original order.
#[instrument(skip_all, fields(?dispatch))]
pub async fn run(
    engine: &ConvergenceEngine,
    dispatch: Dispatch,
) -> Result<Outcome, EngineError> {
    match dispatch {
        Dispatch::Hook(event) => {
            let store = engine.store();
            let queued: Vec<Event> = store.load_deferred()?;
            let mut pending = Vec::new();
            for event in queued {
                debug!(?event, "replaying deferred event");
                if let Outcome::Deferred(_) = engine.handle(&event).await? {
                    pending.push(event);
                }
            }
            let outcome = engine.handle(&event).await?;
            if matches!(outcome, Outcome::Deferred(_)) && !pending.contains(&event) {
                pending.push(event);
            }
            store.save_deferred(&pending)?;
            Ok(outcome)
        }
        Dispatch::Action(action) => {
            engine.run_action(action).await?;
            Ok(Outcome::Completed)
        }
        Dispatch::Unhandled(path) => {
            info!(%path, "nothing to do");
            Ok(Outcome::Completed)
        }
    }
}
