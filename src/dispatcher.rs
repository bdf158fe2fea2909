//! # Dispatcher
//!
//! Single entry point composing the handler registry, named chain and state
//! machine definitions, the subscriber registry, and the command queue.
//!
//! ## Run Flow
//!
//! ```text
//! run(name, context)
//!   ├── look up definition (chain or state machine)
//!   ├── execute with cancellation token checked between handlers
//!   ├── Fault           -> Err(DispatchError::Fault { handler, .. })
//!   └── otherwise       -> drain emitted events, notify subscribers,
//!                          Ok(RunReport { context, outcome, trace, .. })
//! ```
//!
//! The dispatcher never retries. Retry policy belongs around the whole `run`
//! call, keyed on [`Outcome::is_retryable`].

use crate::cancellation::CancellationToken;
use crate::chain::Chain;
use crate::config::DispatcherConfig;
use crate::context::{Context, ContextValues};
use crate::error::{DispatchError, DispatchResult, HandlerFault};
use crate::handler::{HandlerRef, HandlerUnit, Outcome, Verdict};
use crate::logging::{log_dispatch_operation, log_error};
use crate::registry::{CommandQueue, CommandReceipt, HandlerRegistry, Notification, SubscriberRegistry};
use crate::state_machine::{OutcomeMatcher, StateMachine, StateMachineInstance};
use crate::trace::Trace;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// A named, immutable definition the dispatcher can run.
#[derive(Debug, Clone)]
pub enum Definition {
    Chain(Arc<Chain>),
    StateMachine(Arc<StateMachine>),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Self::Chain(chain) => chain.name(),
            Self::StateMachine(machine) => machine.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chain(_) => "chain",
            Self::StateMachine(_) => "state_machine",
        }
    }
}

/// Result of a successful [`Dispatcher::run`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub definition: String,
    pub context: Context,
    pub outcome: Outcome,
    pub trace: Trace,
    /// State the machine stopped in; `None` for chains.
    pub final_state: Option<String>,
    /// Deliveries of events emitted during the run.
    pub notifications: Vec<Notification>,
}

impl RunReport {
    pub fn is_handled(&self) -> bool {
        self.outcome.is_handled()
    }
}

/// Per-definition result inside a [`FanOutReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchReport {
    pub definition: String,
    pub outcome: Outcome,
    pub trace: Trace,
    pub final_state: Option<String>,
}

/// Result of [`Dispatcher::fan_out`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutReport {
    pub run_id: Uuid,
    /// Parent context after the merge.
    pub context: Context,
    /// In the order the definitions were named.
    pub branches: Vec<BranchReport>,
    pub notifications: Vec<Notification>,
}

struct Execution {
    context: Context,
    outcome: Outcome,
    trace: Trace,
    final_state: Option<String>,
}

pub struct Dispatcher {
    handlers: HandlerRegistry,
    definitions: DashMap<String, Definition>,
    subscribers: Arc<SubscriberRegistry>,
    commands: CommandQueue,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::build(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> DispatchResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: DispatcherConfig) -> Self {
        Self {
            handlers: HandlerRegistry::new(),
            definitions: DashMap::new(),
            subscribers: Arc::new(
                SubscriberRegistry::new().with_panic_capture(config.catch_panics),
            ),
            commands: CommandQueue::new().with_panic_capture(config.catch_panics),
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Shared handle, usable from inside handler actions.
    pub fn subscriber_registry(&self) -> Arc<SubscriberRegistry> {
        Arc::clone(&self.subscribers)
    }

    // ===== Registration =====

    /// Register a handler, superseding any handler with the same name.
    ///
    /// Definitions built earlier keep the handler they resolved; rebuild them
    /// to pick up the replacement.
    pub fn register_handler(&self, handler: HandlerRef) -> Option<HandlerRef> {
        self.handlers.register(handler)
    }

    /// Register a closure-backed unit built from `predicate` and `action`.
    pub fn register<P, A>(&self, name: &str, predicate: P, action: A) -> Option<HandlerRef>
    where
        P: Fn(&Context) -> bool + Send + Sync + 'static,
        A: Fn(&mut Context) -> Result<Verdict, HandlerFault> + Send + Sync + 'static,
    {
        self.register_handler(HandlerUnit::new(name, predicate, action).into_ref())
    }

    /// Build a chain from registered handler names and store it under `name`.
    pub fn build_chain<S: AsRef<str>>(&self, name: &str, handler_names: &[S]) -> DispatchResult<Arc<Chain>> {
        let units = self.handlers.resolve(handler_names)?;
        self.register_chain(Chain::new(name, units)?)
    }

    pub fn register_chain(&self, chain: Chain) -> DispatchResult<Arc<Chain>> {
        let chain = Arc::new(chain);
        self.insert_definition(Definition::Chain(Arc::clone(&chain)))?;
        Ok(chain)
    }

    /// Build a state machine from `(state, handler name)` pairs and
    /// `(from, on, to)` transitions. The initial state defaults to the first
    /// listed state.
    pub fn build_state_machine(
        &self,
        name: &str,
        states: &[(&str, &str)],
        transitions: &[(&str, OutcomeMatcher, &str)],
        initial: Option<&str>,
    ) -> DispatchResult<Arc<StateMachine>> {
        let mut builder = StateMachine::builder(name);
        for (state, handler_name) in states {
            let handler = self
                .handlers
                .get(handler_name)
                .ok_or_else(|| DispatchError::UnknownHandler((*handler_name).to_string()))?;
            builder = builder.state(*state, handler);
        }
        for (from, on, to) in transitions {
            builder = builder.transition(*from, on.clone(), *to);
        }
        if let Some(initial) = initial {
            builder = builder.initial(initial);
        }

        self.register_state_machine(builder.build()?)
    }

    pub fn register_state_machine(&self, machine: StateMachine) -> DispatchResult<Arc<StateMachine>> {
        let machine = Arc::new(machine);
        self.insert_definition(Definition::StateMachine(Arc::clone(&machine)))?;
        Ok(machine)
    }

    fn insert_definition(&self, definition: Definition) -> DispatchResult<()> {
        match self.definitions.entry(definition.name().to_string()) {
            Entry::Occupied(occupied) => Err(DispatchError::DefinitionExists(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                debug!(
                    definition = definition.name(),
                    kind = definition.kind(),
                    "Definition registered"
                );
                vacant.insert(definition);
                Ok(())
            }
        }
    }

    /// Remove a definition so the name can be rebuilt.
    pub fn remove_definition(&self, name: &str) -> Option<Definition> {
        self.definitions.remove(name).map(|(_, definition)| definition)
    }

    pub fn definition(&self, name: &str) -> Option<Definition> {
        self.definitions.get(name).map(|entry| entry.value().clone())
    }

    /// Definition names, sorted.
    pub fn definition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .definitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    // ===== Subscriptions =====

    pub fn subscribe(&self, event_type: &str, unit: HandlerRef) -> bool {
        self.subscribers.subscribe(event_type, unit)
    }

    /// Subscribe a registered handler by name.
    pub fn subscribe_handler(&self, event_type: &str, handler_name: &str) -> DispatchResult<bool> {
        let handler = self
            .handlers
            .get(handler_name)
            .ok_or_else(|| DispatchError::UnknownHandler(handler_name.to_string()))?;
        Ok(self.subscribers.subscribe(event_type, handler))
    }

    pub fn unsubscribe(&self, event_type: &str, name: &str) -> bool {
        self.subscribers.unsubscribe(event_type, name)
    }

    pub fn notify(&self, event_type: &str, payload: Value) -> Vec<Notification> {
        self.subscribers.notify(event_type, payload)
    }

    // ===== Commands =====

    /// Queue a registered handler to run later against `payload`.
    pub fn enqueue_command(&self, handler_name: &str, payload: Value) -> DispatchResult<u64> {
        let handler = self
            .handlers
            .get(handler_name)
            .ok_or_else(|| DispatchError::UnknownHandler(handler_name.to_string()))?;
        Ok(self.commands.enqueue(handler, payload))
    }

    pub fn drain_commands(&self) -> Vec<CommandReceipt> {
        self.commands.drain()
    }

    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    // ===== Execution =====

    /// Run the named chain or state machine against `context`.
    ///
    /// Uses a deadline token when `default_deadline_ms` is configured.
    pub fn run(&self, name: &str, context: Context) -> DispatchResult<RunReport> {
        let token = self.default_token();
        self.run_with_cancellation(name, context, &token)
    }

    #[instrument(skip(self, context, token), fields(definition = %name, run_id = tracing::field::Empty))]
    pub fn run_with_cancellation(
        &self,
        name: &str,
        context: Context,
        token: &CancellationToken,
    ) -> DispatchResult<RunReport> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let definition = self.lookup(name)?;
        let execution = self
            .execute(&definition, context, token)
            .map_err(|err| self.report_failure(run_id, name, err))?;

        let Execution {
            mut context,
            outcome,
            trace,
            final_state,
        } = execution;
        let notifications = self.deliver_events(&mut context);

        log_dispatch_operation(
            "run",
            &run_id.to_string(),
            name,
            outcome.label(),
            final_state.as_deref(),
        );

        Ok(RunReport {
            run_id,
            definition: name.to_string(),
            context,
            outcome,
            trace,
            final_state,
            notifications,
        })
    }

    /// Run several definitions in parallel, each on its own fork of `context`,
    /// then fold the forks back with `merge`.
    ///
    /// Forks are handed to `merge` in the order the definitions were named. A
    /// fault in any branch fails the whole fan-out; the earliest named
    /// faulting branch is reported.
    #[instrument(skip(self, names, context, merge), fields(branches = names.len(), run_id = tracing::field::Empty))]
    pub fn fan_out<S, F>(&self, names: &[S], mut context: Context, merge: F) -> DispatchResult<FanOutReport>
    where
        S: AsRef<str>,
        F: FnOnce(&mut ContextValues, Vec<Context>),
    {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let definitions = names
            .iter()
            .map(|name| self.lookup(name.as_ref()))
            .collect::<DispatchResult<Vec<_>>>()?;
        let token = self.default_token();

        let results: Vec<DispatchResult<Execution>> = crossbeam::scope(|scope| {
            let handles: Vec<_> = definitions
                .iter()
                .map(|definition| {
                    let fork = context.fork();
                    let token = &token;
                    scope.spawn(move |_| self.execute(definition, fork, token))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic));

        let mut forks = Vec::with_capacity(results.len());
        let mut branches = Vec::with_capacity(results.len());
        for (definition, result) in definitions.iter().zip(results) {
            let execution = result.map_err(|err| self.report_failure(run_id, definition.name(), err))?;
            forks.push(execution.context);
            branches.push(BranchReport {
                definition: definition.name().to_string(),
                outcome: execution.outcome,
                trace: execution.trace,
                final_state: execution.final_state,
            });
        }

        context.merge_forks(forks, merge)?;
        let notifications = self.deliver_events(&mut context);

        log_dispatch_operation(
            "fan_out",
            &run_id.to_string(),
            &names
                .iter()
                .map(|name| name.as_ref())
                .collect::<Vec<_>>()
                .join(","),
            "merged",
            None,
        );

        Ok(FanOutReport {
            run_id,
            context,
            branches,
            notifications,
        })
    }

    fn lookup(&self, name: &str) -> DispatchResult<Definition> {
        self.definition(name)
            .ok_or_else(|| DispatchError::UnknownDefinition(name.to_string()))
    }

    fn default_token(&self) -> CancellationToken {
        match self.config.default_deadline() {
            Some(deadline) => CancellationToken::with_deadline(deadline),
            None => CancellationToken::new(),
        }
    }

    fn execute(
        &self,
        definition: &Definition,
        context: Context,
        token: &CancellationToken,
    ) -> DispatchResult<Execution> {
        match definition {
            Definition::Chain(chain) => self.execute_chain(chain, context, token),
            Definition::StateMachine(machine) => self.execute_machine(machine, context, token),
        }
    }

    fn execute_chain(
        &self,
        chain: &Chain,
        mut context: Context,
        token: &CancellationToken,
    ) -> DispatchResult<Execution> {
        let mut trace = Trace::new();
        let outcome = chain.execute(&mut context, &mut trace, token, self.config.catch_panics);

        if let Outcome::Fault(reason) = outcome {
            let handler = trace
                .last()
                .map(|entry| entry.handler.clone())
                .unwrap_or_default();
            return Err(DispatchError::Fault {
                handler,
                reason,
                trace,
            });
        }

        Ok(Execution {
            context,
            outcome,
            trace,
            final_state: None,
        })
    }

    fn execute_machine(
        &self,
        machine: &Arc<StateMachine>,
        context: Context,
        token: &CancellationToken,
    ) -> DispatchResult<Execution> {
        if token.is_cancelled() {
            debug!(machine = machine.name(), "Cancelled before entering the initial state");
            return Ok(Execution {
                context,
                outcome: Outcome::Cancelled,
                trace: Trace::new(),
                final_state: None,
            });
        }

        let mut instance =
            StateMachineInstance::start_with(Arc::clone(machine), context, self.config.catch_panics)?;
        let mut cancelled = false;

        while !instance.is_terminal() {
            if token.is_cancelled() {
                debug!(
                    machine = machine.name(),
                    state = instance.current_state(),
                    "State machine cancelled between steps"
                );
                cancelled = true;
                break;
            }
            if instance.steps() >= self.config.max_machine_steps {
                warn!(
                    machine = machine.name(),
                    state = instance.current_state(),
                    limit = self.config.max_machine_steps,
                    "State machine step limit reached"
                );
                return Err(DispatchError::StepLimitExceeded {
                    machine: machine.name().to_string(),
                    limit: self.config.max_machine_steps,
                });
            }
            instance.advance()?;
        }

        let (context, last_outcome, trace, final_state) = instance.into_parts();
        Ok(Execution {
            context,
            outcome: if cancelled {
                Outcome::Cancelled
            } else {
                last_outcome
            },
            trace,
            final_state: Some(final_state),
        })
    }

    fn deliver_events(&self, context: &mut Context) -> Vec<Notification> {
        context
            .drain_events()
            .into_iter()
            .flat_map(|event| self.subscribers.notify(&event.event_type, event.payload))
            .collect()
    }

    fn report_failure(&self, run_id: Uuid, name: &str, err: DispatchError) -> DispatchError {
        let context = format!("run_id={run_id} definition={name}");
        log_error("dispatcher", "run", &err.to_string(), Some(&context));
        err
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers)
            .field("definitions", &self.definition_names())
            .field("subscribers", &self.subscribers)
            .field("commands", &self.commands)
            .field("config", &self.config)
            .finish()
    }
}
