//! Location and Function identity
//!
//! Every distinct registry key gets exactly one [`Location`]; IDs are handed
//! out as `len + 1` so they are dense, 1-based and in creation order.

use super::config::RegistryScope;
use super::stack_decoder::ResolvedStack;
use crate::domain::{FunctionId, LocationId, Pid, RegistryError, StackSide};
use crate::profile::{Function, FunctionOrigin, Location};
use std::collections::{HashMap, HashSet};

/// Owner used for kernel addresses and for everything under global scope
const SHARED_OWNER: u32 = 0;

pub struct IdentityRegistry {
    scope: RegistryScope,
    max_locations: Option<usize>,
    index: HashMap<(u32, u64), LocationId>,
    locations: Vec<Location>,
    functions: Vec<Function>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new(scope: RegistryScope, max_locations: Option<usize>) -> Self {
        Self {
            scope,
            max_locations,
            index: HashMap::new(),
            locations: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Registry key owner for an address seen in `pid` on `side`
    #[must_use]
    pub fn owner(&self, pid: Pid, side: StackSide) -> u32 {
        match (self.scope, side) {
            (RegistryScope::PerProcess, StackSide::User) => pid.0,
            _ => SHARED_OWNER,
        }
    }

    #[must_use]
    pub fn lookup(&self, pid: Pid, address: u64, side: StackSide) -> Option<LocationId> {
        self.index.get(&(self.owner(pid, side), address)).copied()
    }

    /// Number of Locations submitting `stack` would create
    #[must_use]
    pub fn count_missing(&self, pid: Pid, stack: &ResolvedStack) -> usize {
        let kernel = stack.kernel.iter().map(|&a| (self.owner(pid, StackSide::Kernel), a));
        let user = stack.user.iter().map(|&a| (self.owner(pid, StackSide::User), a));
        let missing: HashSet<(u32, u64)> =
            kernel.chain(user).filter(|key| !self.index.contains_key(key)).collect();
        missing.len()
    }

    /// Check that the whole stack fits in the budget before creating anything
    ///
    /// # Errors
    /// Returns [`RegistryError::BudgetExhausted`] if it does not
    pub fn ensure_capacity(&self, pid: Pid, stack: &ResolvedStack) -> Result<(), RegistryError> {
        let Some(limit) = self.max_locations else {
            return Ok(());
        };
        if self.locations.len() + self.count_missing(pid, stack) > limit {
            return Err(RegistryError::BudgetExhausted { limit });
        }
        Ok(())
    }

    /// Location for `address`, creating it on first sight
    ///
    /// The flag is true when the Location was created by this call; the
    /// caller then owes it a function binding.
    ///
    /// # Errors
    /// Returns [`RegistryError::BudgetExhausted`] when a new Location would
    /// exceed the budget
    pub fn resolve(
        &mut self,
        pid: Pid,
        address: u64,
        side: StackSide,
    ) -> Result<(LocationId, bool), RegistryError> {
        let key = (self.owner(pid, side), address);
        if let Some(&id) = self.index.get(&key) {
            return Ok((id, false));
        }

        if let Some(limit) = self.max_locations {
            if self.locations.len() >= limit {
                return Err(RegistryError::BudgetExhausted { limit });
            }
        }

        let id = LocationId(self.locations.len() as u64 + 1);
        self.locations.push(Location::new(id, address));
        self.index.insert(key, id);
        Ok((id, true))
    }

    /// Append a Function; names are not deduplicated
    pub fn add_function(&mut self, name: impl Into<String>, origin: FunctionOrigin) -> FunctionId {
        let id = FunctionId(self.functions.len() as u64 + 1);
        self.functions.push(Function { id, name: name.into(), origin });
        id
    }

    /// # Errors
    /// [`RegistryError::UnknownLocation`] for an ID this registry never issued,
    /// [`RegistryError::AlreadyBound`] for a second binding
    pub fn bind(&mut self, location: LocationId, function: FunctionId) -> Result<(), RegistryError> {
        let slot = usize::try_from(location.0)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| self.locations.get_mut(index))
            .ok_or(RegistryError::UnknownLocation(location))?;
        slot.bind(function)
    }

    #[must_use]
    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Consume the registry, checking every Location has its Function
    ///
    /// # Errors
    /// Returns [`RegistryError::UnboundLocation`] for the first unbound Location
    pub fn seal(self) -> Result<(Vec<Location>, Vec<Function>), RegistryError> {
        if let Some(unbound) = self.locations.iter().find(|l| l.function().is_none()) {
            return Err(RegistryError::UnboundLocation(unbound.id()));
        }
        Ok((self.locations, self.functions))
    }
}
