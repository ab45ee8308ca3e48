//! Function-pointer finite state machine engine for the modem session.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  StateTable                                                  │
//! │  ┌───────────────┬───────────┬──────────┬──────────────────┐ │
//! │  │ ModemState    │ on_enter  │ on_exit  │ on_update        │ │
//! │  ├───────────────┼───────────┼──────────┼──────────────────┤ │
//! │  │ Uninitialized │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  │ PinRequired   │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  │ Registering   │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  │ Registered    │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  │ Error         │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  └───────────────┴───────────┴──────────┴──────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `on_update` for the **current** state.
//! If it returns `Some(next_id)`, the engine runs `on_exit` for the
//! current state, then `on_enter` for the next, and updates the
//! current pointer.  Handlers never talk to the modem directly: they
//! read the [`SessionContext`] blackboard (filled in by the service from
//! command answers and unsolicited lines) and queue
//! [`SessionRequest`](context::SessionRequest)s that the service turns
//! into AT commands.

pub mod context;
pub mod states;

use context::SessionContext;
use log::info;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Session states.
/// Must stay in sync with the state table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModemState {
    Uninitialized = 0,
    PinRequired = 1,
    Registering = 2,
    Registered = 3,
    Error = 4,
}

impl ModemState {
    /// Total number of states — used to size the table array.
    pub const COUNT: usize = 5;

    /// Convert an index back to `ModemState`.  Asserts in debug builds;
    /// returns `Error` in release.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Uninitialized,
            1 => Self::PinRequired,
            2 => Self::Registering,
            3 => Self::Registered,
            4 => Self::Error,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Error
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut SessionContext);

/// Signature for the per-tick update handler.
/// Returns `Some(next)` to trigger a transition, or `None` to stay.
pub type StateUpdateFn = fn(&mut SessionContext) -> Option<ModemState>;

/// Static descriptor for a single FSM state.
pub struct StateDescriptor {
    pub id: ModemState,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// The finite state machine engine.
pub struct Fsm {
    /// Fixed-size table indexed by `ModemState as usize`.
    table: [StateDescriptor; ModemState::COUNT],
    current: usize,
}

impl Fsm {
    /// Construct a new FSM with the given state table, starting in `initial`.
    pub fn new(table: [StateDescriptor; ModemState::COUNT], initial: ModemState) -> Self {
        debug_assert!(table.iter().enumerate().all(|(i, d)| d.id as usize == i));
        Self {
            table,
            current: initial as usize,
        }
    }

    /// Run the initial `on_enter` for the starting state.
    /// Call once after construction, before the first `tick()`.
    pub fn start(&mut self, ctx: &mut SessionContext) {
        info!("session starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance the FSM by one tick.
    ///
    /// 1. Call `on_update` for the current state.
    /// 2. If it returns `Some(next)`, execute the transition:
    ///    `on_exit(current)` → update pointer → `on_enter(next)`.
    pub fn tick(&mut self, ctx: &mut SessionContext) {
        let next = (self.table[self.current].on_update)(ctx);

        if let Some(next_id) = next {
            if next_id as usize != self.current {
                self.transition(next_id, ctx);
            }
        }
    }

    /// Force an immediate transition (transport failure, reinitialise).
    pub fn force_transition(&mut self, next: ModemState, ctx: &mut SessionContext) {
        if next as usize != self.current {
            self.transition(next, ctx);
        }
    }

    pub fn current_state(&self) -> ModemState {
        ModemState::from_index(self.current)
    }

    fn transition(&mut self, next_id: ModemState, ctx: &mut SessionContext) {
        let next_idx = next_id as usize;

        info!(
            "session transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
