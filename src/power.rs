//! Inactivity-driven power state machine.
//!
//! Time is passed in explicitly (`now_ms`) so the machine is a pure function
//! of its inputs. Without activity it walks Active → Idle → LightSleep →
//! DeepSleep one step at a time as the inactivity span crosses each timeout;
//! any activity or wake request snaps it straight back to Active.

use strum::{Display, EnumIter};

use crate::config::PowerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum PowerState {
    Active,
    Idle,
    LightSleep,
    DeepSleep,
}

impl PowerState {
    /// The next state on the forward path, if any
    pub fn deeper(self) -> Option<Self> {
        match self {
            PowerState::Active => Some(PowerState::Idle),
            PowerState::Idle => Some(PowerState::LightSleep),
            PowerState::LightSleep => Some(PowerState::DeepSleep),
            PowerState::DeepSleep => None,
        }
    }

    /// Whether the capture buffer keeps sampling in this state
    pub fn captures_audio(self, config: &PowerConfig) -> bool {
        !(self == PowerState::DeepSleep && config.suspend_capture_in_deep_sleep)
    }

    /// Whether frames may reach the inference engine in this state
    pub fn allows_inference(self) -> bool {
        matches!(self, PowerState::Active | PowerState::Idle)
    }

    pub fn is_sleeping(self) -> bool {
        matches!(self, PowerState::LightSleep | PowerState::DeepSleep)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransitionCause {
    /// Inactivity crossed a timeout
    Timeout,
    /// VAD activity or a completed inference
    Activity,
    /// External wake source
    Wake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerTransition {
    pub from: PowerState,
    pub to: PowerState,
    pub at_ms: u64,
    pub cause: TransitionCause,
}

#[derive(Debug, Clone)]
pub struct PowerStateMachine {
    config: PowerConfig,
    state: PowerState,
    last_activity_ms: u64,
}

impl PowerStateMachine {
    pub fn new(config: &PowerConfig, now_ms: u64) -> Self {
        Self {
            config: config.clone(),
            state: PowerState::Active,
            last_activity_ms: now_ms,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn inactive_for_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    /// Deepest state the configuration lets the machine reach
    pub fn deepest_allowed(&self) -> PowerState {
        let c = &self.config;
        if !c.power_management {
            PowerState::Active
        } else if !c.auto_light_sleep {
            PowerState::Idle
        } else if !c.deep_sleep_enabled {
            PowerState::LightSleep
        } else {
            PowerState::DeepSleep
        }
    }

    /// Inactivity needed before entering `state`
    pub fn timeout_for(&self, state: PowerState) -> u64 {
        match state {
            PowerState::Active => 0,
            PowerState::Idle => self.config.idle_timeout_ms,
            PowerState::LightSleep => self.config.sleep_timeout_ms,
            PowerState::DeepSleep => self.config.deep_timeout_ms,
        }
    }

    /// Reset the inactivity timer and return to Active
    pub fn record_activity(&mut self, now_ms: u64) -> Option<PowerTransition> {
        self.reset(now_ms, TransitionCause::Activity)
    }

    /// Same effect as activity; kept separate for diagnostics
    pub fn wake(&mut self, now_ms: u64) -> Option<PowerTransition> {
        self.reset(now_ms, TransitionCause::Wake)
    }

    fn reset(&mut self, now_ms: u64, cause: TransitionCause) -> Option<PowerTransition> {
        self.last_activity_ms = self.last_activity_ms.max(now_ms);
        let from = self.state;
        if from == PowerState::Active {
            return None;
        }
        self.state = PowerState::Active;
        let transition = PowerTransition {
            from,
            to: PowerState::Active,
            at_ms: now_ms,
            cause,
        };
        log::info!("⚡ Power: {} → Active ({})", from, cause);
        Some(transition)
    }

    /// Take at most one forward step if its timeout has elapsed
    pub fn advance(&mut self, now_ms: u64) -> Option<PowerTransition> {
        let next = self.state.deeper()?;
        if next > self.deepest_allowed() {
            return None;
        }
        if self.inactive_for_ms(now_ms) < self.timeout_for(next) {
            return None;
        }

        let from = self.state;
        self.state = next;
        log::info!(
            "💤 Power: {} → {} after {} ms idle",
            from,
            next,
            self.inactive_for_ms(now_ms)
        );
        Some(PowerTransition {
            from,
            to: next,
            at_ms: now_ms,
            cause: TransitionCause::Timeout,
        })
    }

    /// Step forward as far as elapsed time allows, passing through every
    /// intermediate state. Returns the transitions taken, in order.
    pub fn tick(&mut self, now_ms: u64) -> Vec<PowerTransition> {
        let mut taken = Vec::new();
        while let Some(transition) = self.advance(now_ms) {
            taken.push(transition);
        }
        taken
    }
}
