//! Callback bridge between compiled reduction programs and the grouping
//! engine.
//!
//! Compiled `update`/`combine`/`eval` (or `general`) functions register under
//! generated symbol names and get stable opaque addresses the engine can
//! invoke without knowing how the program was produced. The registry is
//! owned by the execution session (no process-global symbol table), and a
//! registration lives exactly as long as its operator.

use crate::error::{AggError, AggResult};
use crate::reduce::{GeneralFn, Reduction};
use ahash::AHashMap;
use gather_columnar::ElemKind;
use std::fmt;
use std::sync::Arc;

/// Opaque address of a registered entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackAddr(u64);

impl CallbackAddr {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackPhase {
    Update,
    Combine,
    Eval,
    General,
}

/// The callable behind an entry point.
#[derive(Clone)]
pub enum CallbackTarget {
    Reduction(Arc<dyn Reduction>),
    General(GeneralFn),
}

pub struct CallbackEntry {
    pub symbol: String,
    pub phase: CallbackPhase,
    pub operator_id: u64,
    /// Accumulator column types, fixed at registration; a symbol never
    /// rebinds to different types.
    pub acc_kinds: Vec<ElemKind>,
    pub target: CallbackTarget,
}

impl CallbackEntry {
    pub fn reduction(&self) -> Option<&Arc<dyn Reduction>> {
        match &self.target {
            CallbackTarget::Reduction(r) => Some(r),
            CallbackTarget::General(_) => None,
        }
    }

    pub fn general(&self) -> Option<&GeneralFn> {
        match &self.target {
            CallbackTarget::General(f) => Some(f),
            CallbackTarget::Reduction(_) => None,
        }
    }
}

impl fmt::Debug for CallbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("symbol", &self.symbol)
            .field("phase", &self.phase)
            .field("operator_id", &self.operator_id)
            .field("acc_kinds", &self.acc_kinds)
            .finish()
    }
}

/// Session-owned symbol registry.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    by_symbol: AHashMap<String, CallbackAddr>,
    entries: AHashMap<u64, CallbackEntry>,
    next_addr: u64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point. Idempotent for a given symbol: registering
    /// the same symbol again returns the existing address, but only when the
    /// column types match; late rebinding is refused.
    pub fn register(&mut self, entry: CallbackEntry) -> AggResult<CallbackAddr> {
        if let Some(addr) = self.by_symbol.get(&entry.symbol) {
            let existing = &self.entries[&addr.as_u64()];
            if existing.acc_kinds != entry.acc_kinds || existing.phase != entry.phase {
                return Err(AggError::CallbackTypeMismatch {
                    symbol: entry.symbol,
                });
            }
            return Ok(*addr);
        }

        self.next_addr += 1;
        let addr = CallbackAddr(self.next_addr);
        log::trace!("registering callback {} at {:?}", entry.symbol, addr);
        self.by_symbol.insert(entry.symbol.clone(), addr);
        self.entries.insert(addr.as_u64(), entry);
        Ok(addr)
    }

    pub fn resolve(&self, addr: CallbackAddr) -> Option<&CallbackEntry> {
        self.entries.get(&addr.as_u64())
    }

    pub fn addr_of(&self, symbol: &str) -> Option<CallbackAddr> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every registration owned by an operator (called on dispose).
    pub fn release_operator(&mut self, operator_id: u64) {
        self.by_symbol.retain(|_, addr| {
            let keep = self.entries[&addr.as_u64()].operator_id != operator_id;
            if !keep {
                self.entries.remove(&addr.as_u64());
            }
            keep
        });
    }
}
