use super::definition::StateMachine;
use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};
use crate::handler::{invoke, Handler, Outcome};
use crate::trace::Trace;
use std::sync::Arc;
use tracing::{debug, warn};

/// One session through a [`StateMachine`].
///
/// Entering a state runs its handler. [`advance`](Self::advance) follows the
/// first transition matching the last outcome and enters the target; when no
/// rule matches, the instance is terminal. Dropping an instance between calls
/// is always safe.
#[derive(Debug)]
pub struct StateMachineInstance {
    machine: Arc<StateMachine>,
    current: String,
    context: Context,
    last_outcome: Outcome,
    terminal: bool,
    steps: usize,
    history: Vec<String>,
    trace: Trace,
    catch_panics: bool,
}

impl StateMachineInstance {
    /// Enter the initial state with `context`.
    pub fn start(machine: Arc<StateMachine>, context: Context) -> DispatchResult<Self> {
        Self::start_with(machine, context, true)
    }

    pub(crate) fn start_with(
        machine: Arc<StateMachine>,
        context: Context,
        catch_panics: bool,
    ) -> DispatchResult<Self> {
        let initial = machine.initial_state().to_string();
        let mut instance = Self {
            machine,
            current: initial.clone(),
            context,
            last_outcome: Outcome::PassThrough,
            terminal: false,
            steps: 0,
            history: Vec::new(),
            trace: Trace::new(),
            catch_panics,
        };
        instance.enter(initial)?;
        Ok(instance)
    }

    /// Take the transition matching the last outcome and enter its target.
    ///
    /// On a terminal instance this is a no-op returning the last outcome.
    pub fn advance(&mut self) -> DispatchResult<&Outcome> {
        if self.terminal {
            return Ok(&self.last_outcome);
        }

        match self.next_transition()? {
            Some(next) => {
                debug!(
                    machine = %self.machine.name(),
                    from = %self.current,
                    to = %next,
                    outcome = %self.last_outcome,
                    "State transition"
                );
                self.enter(next)?;
            }
            None => self.terminal = true,
        }

        Ok(&self.last_outcome)
    }

    fn enter(&mut self, state: String) -> DispatchResult<()> {
        let handler = match self.machine.state(&state) {
            Some(definition) => Arc::clone(definition.handler()),
            None => {
                return Err(DispatchError::UndefinedState {
                    machine: self.machine.name().to_string(),
                    from: self.current.clone(),
                    to: state,
                })
            }
        };

        let (entry, outcome) = invoke(handler.as_ref(), &mut self.context, self.catch_panics);
        self.trace.push(entry.in_state(&state));
        self.steps += 1;
        self.history.push(state.clone());
        self.current = state;

        // A state whose handler does not apply passes through
        self.last_outcome = outcome.unwrap_or(Outcome::PassThrough);

        if let Outcome::Fault(reason) = &self.last_outcome {
            self.terminal = true;
            return Err(DispatchError::Fault {
                handler: handler.name().to_string(),
                reason: reason.clone(),
                trace: self.trace.clone(),
            });
        }

        self.terminal = self.next_transition()?.is_none();
        Ok(())
    }

    fn next_transition(&mut self) -> DispatchResult<Option<String>> {
        let resolved = self
            .machine
            .resolve_transition(&self.current, &self.last_outcome, &self.context, self.catch_panics)
            .map(|next| next.map(str::to_string));

        match resolved {
            Ok(next) => Ok(next),
            Err(panic) => {
                self.terminal = true;
                let handler = self
                    .machine
                    .state(&self.current)
                    .map(|state| state.handler().name().to_string())
                    .unwrap_or_default();
                warn!(
                    machine = %self.machine.name(),
                    state = %self.current,
                    handler = %handler,
                    panic = %panic,
                    "Transition guard panicked"
                );
                Err(DispatchError::Fault {
                    handler,
                    reason: format!("guard panicked: {panic}"),
                    trace: self.trace.clone(),
                })
            }
        }
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn current_state(&self) -> &str {
        &self.current
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn last_outcome(&self) -> &Outcome {
        &self.last_outcome
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Number of states entered so far, including the initial one.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// States entered, in order.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn into_context(self) -> Context {
        self.context
    }

    pub(crate) fn into_parts(self) -> (Context, Outcome, Trace, String) {
        (self.context, self.last_outcome, self.trace, self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerFault;
    use crate::handler::{HandlerRef, HandlerUnit, Verdict};
    use crate::state_machine::{OutcomeMatcher, TransitionGuard};

    fn marker(name: &str) -> HandlerRef {
        let key = format!("visited_{name}");
        HandlerUnit::always(name, move |ctx: &mut Context| {
            let visits = ctx.get_i64(&key).unwrap_or(0);
            ctx.insert(key.clone(), visits + 1);
            Ok(Verdict::Handled)
        })
        .into_ref()
    }

    fn three_state_machine() -> Arc<StateMachine> {
        Arc::new(
            StateMachine::builder("lifecycle")
                .state("Start", marker("start"))
                .state("Middle", marker("middle"))
                .state("End", marker("end"))
                .initial("Start")
                .transition("Start", OutcomeMatcher::Handled, "Middle")
                .transition("Middle", OutcomeMatcher::Handled, "End")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_terminal_detection() {
        let mut instance = StateMachineInstance::start(three_state_machine(), Context::new()).unwrap();
        assert_eq!(instance.current_state(), "Start");
        assert!(!instance.is_terminal());

        instance.advance().unwrap();
        assert_eq!(instance.current_state(), "Middle");
        assert!(!instance.is_terminal());

        instance.advance().unwrap();
        assert_eq!(instance.current_state(), "End");
        assert!(instance.is_terminal());

        // Further advances are no-ops
        assert_eq!(instance.advance().unwrap(), &Outcome::Handled);
        assert_eq!(instance.current_state(), "End");
        assert_eq!(instance.steps(), 3);
        assert_eq!(instance.history(), ["Start", "Middle", "End"]);
        assert_eq!(instance.context().get_i64("visited_end"), Some(1));
    }

    #[test]
    fn test_self_transition_reruns_handler() {
        let counter = HandlerUnit::always("retry", |ctx: &mut Context| {
            let attempts = ctx.get_i64("attempts").unwrap_or(0) + 1;
            ctx.insert("attempts", attempts);
            if attempts < 3 {
                Ok(Verdict::PassThrough)
            } else {
                Ok(Verdict::Handled)
            }
        })
        .into_ref();

        let machine = StateMachine::builder("retrying")
            .state("Trying", counter)
            .state("Done", marker("done"))
            .transition("Trying", OutcomeMatcher::PassThrough, "Trying")
            .transition("Trying", OutcomeMatcher::Handled, "Done")
            .build()
            .unwrap();

        let mut instance = StateMachineInstance::start(Arc::new(machine), Context::new()).unwrap();
        let mut revisions = vec![instance.context().revision()];
        while !instance.is_terminal() {
            instance.advance().unwrap();
            revisions.push(instance.context().revision());
        }

        assert_eq!(instance.current_state(), "Done");
        assert_eq!(instance.context().get_i64("attempts"), Some(3));
        assert!(revisions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_unmatched_outcome_is_terminal() {
        let rejecting = HandlerUnit::always("gate", |_: &mut Context| Ok(Verdict::reject("closed")))
            .into_ref();
        let machine = StateMachine::builder("gated")
            .state("Gate", rejecting)
            .state("Through", marker("through"))
            .transition("Gate", OutcomeMatcher::Handled, "Through")
            .build()
            .unwrap();

        let instance = StateMachineInstance::start(Arc::new(machine), Context::new()).unwrap();
        assert!(instance.is_terminal());
        assert_eq!(instance.last_outcome(), &Outcome::Reject("closed".to_string()));
    }

    #[test]
    fn test_fault_surfaces_handler_identity() {
        let broken = HandlerUnit::always("explode", |_: &mut Context| {
            Err(HandlerFault::new("disk on fire"))
        })
        .into_ref();
        let machine = StateMachine::builder("faulty")
            .state("Start", marker("start"))
            .state("Broken", broken)
            .transition("Start", OutcomeMatcher::Handled, "Broken")
            .build()
            .unwrap();

        let mut instance = StateMachineInstance::start(Arc::new(machine), Context::new()).unwrap();
        let err = instance.advance().unwrap_err();
        match err {
            DispatchError::Fault { handler, reason, trace } => {
                assert_eq!(handler, "explode");
                assert_eq!(reason, "disk on fire");
                assert_eq!(trace.len(), 2);
                assert_eq!(trace.last().and_then(|e| e.state.as_deref()), Some("Broken"));
            }
            other => panic!("Expected Fault, got {other:?}"),
        }
        assert!(instance.is_terminal());
    }

    fn exploding_guard_machine() -> Arc<StateMachine> {
        Arc::new(
            StateMachine::builder("guarded")
                .state("Start", marker("start"))
                .state("Middle", marker("middle"))
                .state("End", marker("end"))
                .transition("Start", OutcomeMatcher::Handled, "Middle")
                .guarded_transition(
                    "Middle",
                    OutcomeMatcher::Handled,
                    TransitionGuard::new("explodes", |_: &Context| panic!("guard exploded")),
                    "End",
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_guard_panic_becomes_fault() {
        let mut instance =
            StateMachineInstance::start(exploding_guard_machine(), Context::new()).unwrap();
        assert_eq!(instance.current_state(), "Start");

        // Entering Middle evaluates its outgoing guard for terminal detection
        let err = instance.advance().unwrap_err();
        match err {
            DispatchError::Fault { handler, reason, trace } => {
                assert_eq!(handler, "middle");
                assert!(reason.starts_with("guard panicked"));
                assert!(reason.contains("guard exploded"));
                assert_eq!(trace.len(), 2);
            }
            other => panic!("Expected Fault, got {other:?}"),
        }
        assert!(instance.is_terminal());
        assert_eq!(instance.current_state(), "Middle");
    }

    #[test]
    fn test_guard_panic_propagates_without_capture() {
        let result = std::panic::catch_unwind(|| {
            StateMachineInstance::start_with(exploding_guard_machine(), Context::new(), false)
                .and_then(|mut instance| instance.advance().map(|_| ()))
        });
        assert!(result.is_err());
    }
}
