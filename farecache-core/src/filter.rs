//! Request-scoped filtered views over cached collections
//!
//! Predicates answer "exclude this record?" and are built only from request
//! values (travel date, ticket date, purpose, vendor). The shared collection
//! is never touched: a filter that excludes nothing hands back the very same
//! reference, otherwise a new collection of the surviving record handles is
//! adopted by the transaction's [`DeleteList`].

use crate::delete_list::DeleteList;
use crate::record::{CachedCollection, Effective, Inhibit};
use chrono::NaiveDate;
use std::sync::Arc;

/// Exclusion predicate over records
pub trait Predicate<R: ?Sized> {
    /// `true` removes the record from the view
    fn exclude(&self, record: &R) -> bool;
}

impl<R: ?Sized, F> Predicate<R> for F
where
    F: Fn(&R) -> bool,
{
    fn exclude(&self, record: &R) -> bool {
        self(record)
    }
}

/// Union of two exclusion predicates
#[derive(Debug, Clone, Copy)]
pub struct Or<A, B>(pub A, pub B);

impl<R: ?Sized, A: Predicate<R>, B: Predicate<R>> Predicate<R> for Or<A, B> {
    fn exclude(&self, record: &R) -> bool {
        self.0.exclude(record) || self.1.exclude(record)
    }
}

/// Narrow `collection` to the records `predicate` keeps.
///
/// Returns `collection` itself (same allocation) when nothing is excluded;
/// otherwise a new collection in original order, owned by `delete_list`.
pub fn apply_filter<R, P>(
    delete_list: &DeleteList,
    collection: &CachedCollection<R>,
    predicate: P,
) -> CachedCollection<R>
where
    R: Send + Sync + 'static,
    P: Predicate<R>,
{
    let Some(first) = collection.iter().position(|r| predicate.exclude(r)) else {
        return collection.clone();
    };

    let mut kept: Vec<Arc<R>> = Vec::with_capacity(collection.len() - 1);
    kept.extend(collection[..first].iter().cloned());
    kept.extend(
        collection[first + 1..]
            .iter()
            .filter(|r| !predicate.exclude(r))
            .cloned(),
    );

    delete_list.adopt_collection(CachedCollection::from_shared(kept))
}

/// Excludes records not in force for a travel date as seen on a ticket date.
///
/// In force means `effective <= date <= discontinue` and
/// `create <= ticket_date <= expire`.
#[derive(Debug, Clone, Copy)]
pub struct IsNotEffective {
    pub date: NaiveDate,
    pub ticket_date: NaiveDate,
}

impl IsNotEffective {
    pub fn new(date: NaiveDate, ticket_date: NaiveDate) -> Self {
        Self { date, ticket_date }
    }
}

impl<R: Effective> Predicate<R> for IsNotEffective {
    fn exclude(&self, record: &R) -> bool {
        self.date < record.effective_date()
            || self.date > record.discontinue_date()
            || self.ticket_date < record.create_date()
            || self.ticket_date > record.expire_date()
    }
}

/// Excludes records already discontinued or expired at `date`
#[derive(Debug, Clone, Copy)]
pub struct IsNotCurrent {
    pub date: NaiveDate,
}

impl<R: Effective> Predicate<R> for IsNotCurrent {
    fn exclude(&self, record: &R) -> bool {
        self.date > record.discontinue_date() || self.date > record.expire_date()
    }
}

/// What the caller will do with the records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Pricing,
    Display,
}

/// Excludes inhibited records; display-only rows pass for display requests
#[derive(Debug, Clone, Copy)]
pub struct IsInhibited {
    pub usage: Usage,
}

impl IsInhibited {
    pub fn for_pricing() -> Self {
        Self {
            usage: Usage::Pricing,
        }
    }

    pub fn for_display() -> Self {
        Self {
            usage: Usage::Display,
        }
    }
}

impl<R: Effective> Predicate<R> for IsInhibited {
    fn exclude(&self, record: &R) -> bool {
        match (record.inhibit(), self.usage) {
            (Inhibit::Available, _) => false,
            (Inhibit::DisplayOnly, Usage::Display) => false,
            (Inhibit::DisplayOnly, Usage::Pricing) => true,
            (Inhibit::Inhibited, _) => true,
        }
    }
}

/// Excludes records filed by a different vendor; rows without a vendor pass
#[derive(Debug, Clone)]
pub struct VendorMismatch {
    pub vendor: String,
}

impl VendorMismatch {
    pub fn new(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
        }
    }
}

impl<R: Effective> Predicate<R> for VendorMismatch {
    fn exclude(&self, record: &R) -> bool {
        record.vendor().is_some_and(|v| v != self.vendor)
    }
}
