use super::guards::{OutcomeMatcher, TransitionGuard};
use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};
use crate::handler::{guarded, Handler, HandlerRef, Outcome};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Transition out of a state: taken when the outcome matches and the optional
/// guard holds.
#[derive(Debug, Clone)]
pub struct TransitionRule {
    pub on: OutcomeMatcher,
    pub guard: Option<TransitionGuard>,
    pub target: String,
}

impl TransitionRule {
    pub fn new(on: OutcomeMatcher, target: impl Into<String>) -> Self {
        Self {
            on,
            guard: None,
            target: target.into(),
        }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: TransitionGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn matches(&self, outcome: &Outcome, context: &Context) -> bool {
        self.on.matches(outcome)
            && self
                .guard
                .as_ref()
                .map_or(true, |guard| guard.check(context))
    }
}

/// A named state bound to one handler.
#[derive(Clone)]
pub struct StateDefinition {
    name: String,
    handler: HandlerRef,
    transitions: Vec<TransitionRule>,
}

impl StateDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }

    pub fn transitions(&self) -> &[TransitionRule] {
        &self.transitions
    }
}

impl fmt::Debug for StateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDefinition")
            .field("name", &self.name)
            .field("handler", &self.handler.name())
            .field("transitions", &self.transitions)
            .finish()
    }
}

/// Immutable, validated state machine definition.
#[derive(Debug, Clone)]
pub struct StateMachine {
    name: String,
    initial: String,
    states: Vec<StateDefinition>,
    index: HashMap<String, usize>,
    unreachable: Vec<String>,
}

impl StateMachine {
    pub fn builder(name: impl Into<String>) -> StateMachineBuilder {
        StateMachineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_state(&self) -> &str {
        &self.initial
    }

    /// State names in declaration order.
    pub fn states(&self) -> Vec<&str> {
        self.states.iter().map(|state| state.name.as_str()).collect()
    }

    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.index.get(name).map(|&i| &self.states[i])
    }

    pub fn contains_state(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn transitions_from(&self, state: &str) -> &[TransitionRule] {
        match self.state(state) {
            Some(definition) => &definition.transitions,
            None => &[],
        }
    }

    /// A sink has no outgoing transitions at all.
    pub fn is_sink(&self, state: &str) -> bool {
        self.transitions_from(state).is_empty()
    }

    /// States that cannot be reached from the initial state.
    pub fn unreachable_states(&self) -> &[String] {
        &self.unreachable
    }

    /// Target of the first rule out of `state` matching `outcome`, if any.
    pub fn next_state(&self, state: &str, outcome: &Outcome, context: &Context) -> Option<&str> {
        self.transitions_from(state)
            .iter()
            .find(|rule| rule.matches(outcome, context))
            .map(|rule| rule.target.as_str())
    }

    /// Like [`next_state`](Self::next_state), but a panicking guard is
    /// returned as `Err(message)` when `catch_panics` is set.
    pub(crate) fn resolve_transition(
        &self,
        state: &str,
        outcome: &Outcome,
        context: &Context,
        catch_panics: bool,
    ) -> Result<Option<&str>, String> {
        for rule in self.transitions_from(state) {
            if guarded(catch_panics, || rule.matches(outcome, context))? {
                return Ok(Some(rule.target.as_str()));
            }
        }
        Ok(None)
    }
}

/// Builder for [`StateMachine`]. All validation happens in [`build`](Self::build).
pub struct StateMachineBuilder {
    name: String,
    initial: Option<String>,
    states: Vec<(String, HandlerRef)>,
    transitions: Vec<(String, TransitionRule)>,
}

impl StateMachineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: None,
            states: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Declare a state. The first declared state is the default initial state.
    #[must_use]
    pub fn state(mut self, name: impl Into<String>, handler: HandlerRef) -> Self {
        self.states.push((name.into(), handler));
        self
    }

    #[must_use]
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.initial = Some(name.into());
        self
    }

    #[must_use]
    pub fn transition(
        mut self,
        from: impl Into<String>,
        on: OutcomeMatcher,
        to: impl Into<String>,
    ) -> Self {
        self.transitions
            .push((from.into(), TransitionRule::new(on, to)));
        self
    }

    #[must_use]
    pub fn guarded_transition(
        mut self,
        from: impl Into<String>,
        on: OutcomeMatcher,
        guard: TransitionGuard,
        to: impl Into<String>,
    ) -> Self {
        self.transitions
            .push((from.into(), TransitionRule::new(on, to).with_guard(guard)));
        self
    }

    pub fn build(self) -> DispatchResult<StateMachine> {
        let machine = self.name;

        if self.states.is_empty() {
            return Err(DispatchError::EmptyStateMachine { machine });
        }

        let mut index = HashMap::new();
        let mut states = Vec::with_capacity(self.states.len());
        for (name, handler) in self.states {
            if index.contains_key(&name) {
                return Err(DispatchError::DuplicateState {
                    machine,
                    state: name,
                });
            }
            index.insert(name.clone(), states.len());
            states.push(StateDefinition {
                name,
                handler,
                transitions: Vec::new(),
            });
        }

        let initial = match self.initial {
            Some(initial) if index.contains_key(&initial) => initial,
            Some(initial) => {
                return Err(DispatchError::InvalidInitialState {
                    machine,
                    state: initial,
                })
            }
            None => states[0].name.clone(),
        };

        for (from, rule) in self.transitions {
            let Some(&source) = index.get(&from) else {
                return Err(DispatchError::UnknownSourceState {
                    machine,
                    state: from,
                });
            };
            if !index.contains_key(&rule.target) {
                return Err(DispatchError::UndefinedState {
                    machine,
                    from,
                    to: rule.target,
                });
            }
            states[source].transitions.push(rule);
        }

        let unreachable = find_unreachable(&states, &index, &initial);
        if !unreachable.is_empty() {
            warn!(
                machine = %machine,
                states = ?unreachable,
                "State machine has states unreachable from the initial state"
            );
        }

        debug!(
            machine = %machine,
            initial = %initial,
            state_count = states.len(),
            "State machine built"
        );

        Ok(StateMachine {
            name: machine,
            initial,
            states,
            index,
            unreachable,
        })
    }
}

fn find_unreachable(
    states: &[StateDefinition],
    index: &HashMap<String, usize>,
    initial: &str,
) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([initial]);

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        if let Some(&i) = index.get(current) {
            for rule in &states[i].transitions {
                queue.push_back(rule.target.as_str());
            }
        }
    }

    states
        .iter()
        .filter(|state| !visited.contains(state.name.as_str()))
        .map(|state| state.name.clone())
        .collect()
}
