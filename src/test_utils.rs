//! Shared test fixtures: event-sourced aggregates and a wired registry.

use std::sync::Arc;

use crate::aggregate::{AggregateMeta, EventSourced};
use crate::payload::{Payload, Value};
use crate::registry::{EventRegistry, MutatorError};

fn int_field(payload: &Payload, key: &str) -> Result<i64, MutatorError> {
    payload
        .get(key)
        .and_then(Value::as_int)
        .ok_or_else(|| MutatorError::MissingField(key.to_owned()))
}

fn str_field<'a>(payload: &'a Payload, key: &str) -> Result<&'a str, MutatorError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| MutatorError::MissingField(key.to_owned()))
}

/// Simple balance-holding aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub name: String,
    pub balance: i64,
    meta: AggregateMeta,
}

impl EventSourced for Account {
    const AGGREGATE_TYPE: &'static str = "Account";

    fn meta(&self) -> &AggregateMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut AggregateMeta {
        &mut self.meta
    }
}

impl Account {
    /// Live construction: emits the version-1 "opened" event.
    pub fn open(name: &str) -> Self {
        let mut account = Self {
            name: name.to_owned(),
            balance: 0,
            meta: AggregateMeta::new(),
        };
        account.record("opened", Payload::new().with("name", name));
        account
    }

    /// Replay construction: builds state from the payload, emits nothing.
    pub fn from_payload(payload: &Payload) -> Result<Self, MutatorError> {
        Ok(Self {
            name: str_field(payload, "name")?.to_owned(),
            balance: 0,
            meta: AggregateMeta::new(),
        })
    }

    pub fn add(&mut self, amount: i64) {
        self.record("added", Payload::new().with("amount", amount));
        self.balance += amount;
    }

    pub fn subtract(&mut self, amount: i64) {
        self.record("subtracted", Payload::new().with("amount", amount));
        self.balance -= amount;
    }

    /// Records before validating, so a rejected withdrawal still leaves a
    /// buffered event behind.
    pub fn withdraw_checked(&mut self, amount: i64) -> Result<(), MutatorError> {
        self.record("subtracted", Payload::new().with("amount", amount));
        if amount > self.balance {
            return Err(MutatorError::Invalid(format!(
                "insufficient balance for {amount}"
            )));
        }
        self.balance -= amount;
        Ok(())
    }
}

/// Second aggregate type, for recorder routing tests.
#[derive(Debug, Clone, PartialEq)]
pub struct Dog {
    pub name: String,
    pub tricks: Vec<String>,
    meta: AggregateMeta,
}

impl EventSourced for Dog {
    const AGGREGATE_TYPE: &'static str = "Dog";

    fn meta(&self) -> &AggregateMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut AggregateMeta {
        &mut self.meta
    }
}

impl Dog {
    pub fn register(name: &str) -> Self {
        let mut dog = Self {
            name: name.to_owned(),
            tricks: Vec::new(),
            meta: AggregateMeta::new(),
        };
        dog.record("registered", Payload::new().with("name", name));
        dog
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, MutatorError> {
        Ok(Self {
            name: str_field(payload, "name")?.to_owned(),
            tricks: Vec::new(),
            meta: AggregateMeta::new(),
        })
    }

    pub fn add_trick(&mut self, trick: &str) {
        self.record("trick_added", Payload::new().with("trick", trick));
        self.tricks.push(trick.to_owned());
    }
}

/// Registry with both fixture types wired.
pub fn registry() -> Arc<EventRegistry> {
    let mut registry = EventRegistry::new();

    registry.constructor::<Account, _>("opened", Account::from_payload);
    registry.mutator::<Account, _>("added", |account: &mut Account, payload: &Payload| {
        account.balance += int_field(payload, "amount")?;
        Ok(())
    });
    registry.mutator::<Account, _>(
        "subtracted",
        |account: &mut Account, payload: &Payload| {
            account.balance -= int_field(payload, "amount")?;
            Ok(())
        },
    );

    registry.constructor::<Dog, _>("registered", Dog::from_payload);
    registry.mutator::<Dog, _>("trick_added", |dog: &mut Dog, payload: &Payload| {
        dog.tricks.push(str_field(payload, "trick")?.to_owned());
        Ok(())
    });

    Arc::new(registry)
}
