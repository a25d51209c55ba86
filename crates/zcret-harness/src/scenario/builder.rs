//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern.

use std::time::Duration;

use zcret_client::{Identity, SessionConfig};
use zcret_proto::ServerEvent;

use crate::{
    scenario::{OracleFn, World},
    sim_server::SimServer,
};

/// One scripted input.
#[derive(Debug, Clone)]
pub enum Step {
    /// Identity provider reports a change
    Identity(Identity),
    /// User submits chat text
    Submit(String),
    /// Server pushes an event
    Push(ServerEvent),
    /// Another account posts a message
    Post {
        /// Author
        sender: String,
        /// Text
        content: String,
    },
    /// Server heartbeat ping
    Ping,
    /// Server disconnects the namespace
    ServerDisconnect,
    /// Link breaks without a close
    DropLink,
    /// Simulated time passes
    Advance(Duration),
    /// Full teardown
    Shutdown,
}

/// Scenario builder.
///
/// Script the server and the inputs, then call `.oracle()` to get a
/// [`RunnableScenario`].
pub struct Scenario {
    name: String,
    server: SimServer,
    config: SessionConfig,
    steps: Vec<Step>,
}

impl Scenario {
    /// Create a new scenario with a default server.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: SimServer::new(0),
            config: SessionConfig::default(),
            steps: Vec::new(),
        }
    }

    /// Use a scripted server.
    pub fn server(mut self, server: SimServer) -> Self {
        self.server = server;
        self
    }

    /// Use a custom session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect as `account`.
    pub fn connect(self, account: impl Into<String>) -> Self {
        self.step(Step::Identity(Identity::connected(account)))
    }

    /// Report a disconnected identity.
    pub fn disconnect(self) -> Self {
        self.step(Step::Identity(Identity::disconnected()))
    }

    /// Submit chat text.
    pub fn submit(self, text: impl Into<String>) -> Self {
        self.step(Step::Submit(text.into()))
    }

    /// Append any step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute every step in order, then run the oracle.
    ///
    /// Retries scheduled by a step fire before the next step starts, so a
    /// step ends with the session either connected or out of attempts.
    pub fn run(self) -> Result<(), String> {
        let Scenario { name, server, config, steps } = self.scenario;
        let mut world = World::new(server, config);

        for step in steps {
            tracing::debug!(scenario = %name, ?step, "scenario step");
            match step {
                Step::Identity(identity) => world.set_identity(&identity),
                Step::Submit(text) => world.submit(&text),
                Step::Push(event) => world.push(&event),
                Step::Post { sender, content } => world.post(&sender, &content),
                Step::Ping => world.ping(),
                Step::ServerDisconnect => world.server_disconnect(),
                Step::DropLink => world.drop_link(),
                Step::Advance(by) => world.advance(by),
                Step::Shutdown => world.shutdown(),
            }
        }

        (self.oracle)(&world).map_err(|e| format!("Scenario '{name}': {e}"))
    }
}
