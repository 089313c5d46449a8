//! Finding the bindings module a worker should load.
//!
//! A [`ResolutionPlan`] is an ordered list of [`Strategy`] values. Each
//! strategy expands to zero or more locations; the [`Resolver`] tries them in
//! order and keeps the first one that loads.

use crate::bindings::BindingsLoader;
use crate::error::{Error, Result};
use crate::message::LoaderHint;

/// Placeholder replaced by the module name in a hinted template.
pub const NAME_PLACEHOLDER: &str = "{name}";

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Strategy {
    /// A location known when the worker was built.
    Static(String),
    /// A location derived from the message's loader hint.
    Hinted { template: String },
    /// Locations tried last, in the given order.
    Candidates(Vec<String>),
}

impl Strategy {
    fn rank(&self) -> u8 {
        match self {
            Strategy::Static(_) => 0,
            Strategy::Hinted { .. } => 1,
            Strategy::Candidates(_) => 2,
        }
    }

    fn locations(&self, hint: Option<&LoaderHint>) -> Vec<String> {
        match self {
            Strategy::Static(location) => vec![location.clone()],
            Strategy::Hinted { template } => match hint {
                Some(LoaderHint::Url(url)) => vec![url.clone()],
                Some(LoaderHint::ModuleName(name)) => {
                    vec![template.replace(NAME_PLACEHOLDER, name)]
                }
                None => vec![],
            },
            Strategy::Candidates(candidates) => candidates.clone(),
        }
    }
}

/// Strategies sorted by priority: static, then hinted, then candidates.
/// Strategies of equal priority keep the order they were added in.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ResolutionPlan {
    strategies: Vec<Strategy>,
}

impl ResolutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strategy: Strategy) -> Self {
        self.push(strategy);
        self
    }

    pub fn push(&mut self, strategy: Strategy) {
        let index = self
            .strategies
            .iter()
            .position(|it| it.rank() > strategy.rank())
            .unwrap_or(self.strategies.len());
        self.strategies.insert(index, strategy);
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Every location this plan would try for `hint`, in order.
    ///
    /// A URL hint is tried even when the plan has no hinted strategy, right
    /// after any static location. A module name needs a template and is
    /// dropped in that case.
    pub fn locations(&self, hint: Option<&LoaderHint>) -> Vec<String> {
        let hinted = self
            .strategies
            .iter()
            .any(|it| matches!(it, Strategy::Hinted { .. }));
        match hint {
            Some(LoaderHint::Url(_)) if !hinted => {
                let implicit = Strategy::Hinted {
                    template: NAME_PLACEHOLDER.to_owned(),
                };
                return self.clone().with(implicit).locations(hint);
            }
            Some(LoaderHint::ModuleName(name)) if !hinted => {
                log::debug!("no hinted strategy, ignoring module name {name}");
            }
            _ => {}
        }
        self.strategies
            .iter()
            .flat_map(|it| it.locations(hint))
            .collect()
    }
}

pub struct Resolved<B> {
    pub location: String,
    pub bindings: B,
}

pub struct Resolver<L> {
    loader: L,
    plan: ResolutionPlan,
}

impl<L: BindingsLoader> Resolver<L> {
    pub fn new(loader: L, plan: ResolutionPlan) -> Self {
        Self { loader, plan }
    }

    pub fn plan(&self) -> &ResolutionPlan {
        &self.plan
    }

    pub async fn resolve(&self, hint: Option<&LoaderHint>) -> Result<Resolved<L::Bindings>> {
        let mut attempted = vec![];
        for location in self.plan.locations(hint) {
            log::debug!("loading bindings from {location}");
            match self.loader.load(&location).await {
                Ok(bindings) => {
                    return Ok(Resolved { location, bindings });
                }
                Err(e) => {
                    log::warn!("could not load bindings from {location}: {e}");
                    attempted.push(location);
                }
            }
        }
        Err(Error::BindingsNotFound { attempted })
    }
}
