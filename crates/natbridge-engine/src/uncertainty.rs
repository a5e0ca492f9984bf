//! Uncertainty resolver
//!
//! A field, parameter, or return whose native representation is ambiguous
//! declares an ordered candidate set and a fallback. The first candidate that
//! is structurally compatible with the native slot wins; if none is, the
//! fallback is used. The first decision for a site is memoized and never
//! revisited.

use std::fmt;

use dashmap::DashMap;
use natbridge_sdk::{Passing, PointeeCount, Representation, TypeKey, UncertainSpec};

use crate::layout::FieldLayout;

/// Where in a declared type an ambiguous slot lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SitePosition {
    /// Field with this order index
    Field(u32),
    /// Parameter `index` of call target `target`
    Param { target: usize, index: usize },
    /// Return of call target `target`
    Return { target: usize },
}

/// Memo key: declared type plus position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteKey {
    pub owner: TypeKey,
    pub position: SitePosition,
}

impl SiteKey {
    pub fn field(owner: &TypeKey, order: u32) -> Self {
        SiteKey {
            owner: owner.clone(),
            position: SitePosition::Field(order),
        }
    }

    pub fn param(owner: &TypeKey, target: usize, index: usize) -> Self {
        SiteKey {
            owner: owner.clone(),
            position: SitePosition::Param { target, index },
        }
    }

    pub fn ret(owner: &TypeKey, target: usize) -> Self {
        SiteKey {
            owner: owner.clone(),
            position: SitePosition::Return { target },
        }
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            SitePosition::Field(order) => write!(f, "{}.field[{}]", self.owner, order),
            SitePosition::Param { target, index } => {
                write!(f, "{}.target[{}].param[{}]", self.owner, target, index)
            }
            SitePosition::Return { target } => {
                write!(f, "{}.target[{}].return", self.owner, target)
            }
        }
    }
}

/// Structural facts about the native slot being bridged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeShape {
    /// Storage embedded in an aggregate
    Inline { count: u32, aggregate: bool },
    /// A pointer with a known or unknown pointee count
    Pointer(PointeeCount),
    /// Passed or returned by value
    ByValue,
}

impl NativeShape {
    /// Shape of an aggregate field
    pub fn of_field(field: &FieldLayout) -> Self {
        NativeShape::Inline {
            count: field.count,
            aggregate: field.ty.aggregate_key().is_some(),
        }
    }

    /// Shape of a parameter or return slot
    pub fn of_passing(passing: Passing) -> Self {
        match passing {
            Passing::ByValue => NativeShape::ByValue,
            Passing::ByPointer { count } => NativeShape::Pointer(count),
        }
    }

    /// Whether `repr` can be proven compatible with this slot
    pub fn admits(self, repr: Representation) -> bool {
        match (repr, self) {
            (Representation::Reference, NativeShape::Pointer(PointeeCount::Single)) => true,
            (
                Representation::Reference,
                NativeShape::Inline {
                    count: 1,
                    aggregate: true,
                },
            ) => true,
            (Representation::Array, NativeShape::Pointer(PointeeCount::Fixed(_))) => true,
            (Representation::Array, NativeShape::Inline { .. }) => true,
            (Representation::Value, NativeShape::ByValue) => true,
            (Representation::Value, NativeShape::Inline { count: 1, .. }) => true,
            _ => false,
        }
    }
}

/// Recorded outcome for one site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncertaintyChoice {
    pub site: SiteKey,
    pub chosen: Representation,
    /// No candidate was compatible; the fallback was used
    pub fell_back: bool,
}

/// Memoizing resolver shared by all dispatches
#[derive(Default)]
pub struct UncertaintyResolver {
    choices: DashMap<SiteKey, UncertaintyChoice>,
}

impl UncertaintyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `spec` for `site`, reusing the first recorded choice.
    ///
    /// Concurrent first resolvers may each evaluate the candidates, but only
    /// the first insert is kept and every caller returns it.
    pub fn resolve(
        &self,
        spec: &UncertainSpec,
        site: SiteKey,
        shape: NativeShape,
    ) -> UncertaintyChoice {
        if let Some(choice) = self.choices.get(&site) {
            return choice.value().clone();
        }

        let (chosen, fell_back) = match spec.options.iter().copied().find(|r| shape.admits(*r)) {
            Some(repr) => (repr, false),
            None => (spec.fallback, true),
        };
        let candidate = UncertaintyChoice {
            site: site.clone(),
            chosen,
            fell_back,
        };

        let stored = self.choices.entry(site).or_insert(candidate).value().clone();
        if stored.fell_back {
            tracing::warn!(
                site = %stored.site,
                chosen = %stored.chosen,
                ?shape,
                "no candidate representation provably compatible, using fallback"
            );
        } else {
            tracing::debug!(
                site = %stored.site,
                chosen = %stored.chosen,
                "resolved representation"
            );
        }
        stored
    }

    /// Previously recorded choice for `site`
    pub fn choice(&self, site: &SiteKey) -> Option<UncertaintyChoice> {
        self.choices.get(site).map(|c| c.value().clone())
    }

    /// Snapshot of every recorded choice
    pub fn choices(&self) -> Vec<UncertaintyChoice> {
        self.choices.iter().map(|c| c.value().clone()).collect()
    }

    /// Number of recorded choices
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}
