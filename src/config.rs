use log::LevelFilter;

use crate::message::LoaderHint;
use crate::resolver::{ResolutionPlan, Strategy};

pub const DEFAULT_HINT_TEMPLATE: &str = "./pkg/{name}.js";

/// Settings shared by both hosts.
///
/// The default plan is fixed at build time: `WORKER_BINDINGS_URL` becomes
/// the static location and `WORKER_BINDINGS_FALLBACKS` (comma separated)
/// the fallback candidates.
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    pub plan: ResolutionPlan,
    pub log_level: LevelFilter,
    pub max_workers: Option<usize>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            plan: build_plan(
                option_env!("WORKER_BINDINGS_URL"),
                DEFAULT_HINT_TEMPLATE,
                option_env!("WORKER_BINDINGS_FALLBACKS"),
            ),
            log_level: LevelFilter::Info,
            max_workers: None,
        }
    }
}

fn build_plan(
    static_location: Option<&str>,
    template: &str,
    fallbacks: Option<&str>,
) -> ResolutionPlan {
    let mut plan = ResolutionPlan::new();
    if let Some(location) = static_location.filter(|it| !it.is_empty()) {
        plan.push(Strategy::Static(location.to_owned()));
    }
    plan.push(Strategy::Hinted {
        template: template.to_owned(),
    });
    let candidates = fallbacks.map(parse_candidates).unwrap_or_default();
    if !candidates.is_empty() {
        plan.push(Strategy::Candidates(candidates));
    }
    plan
}

fn parse_candidates(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|it| !it.is_empty())
        .map(str::to_owned)
        .collect()
}

/// The module name wasm-bindgen gives this crate's output, unless `PKG_NAME`
/// overrides it at build time.
pub fn default_loader_hint() -> LoaderHint {
    let name = option_env!("PKG_NAME").unwrap_or(env!("CARGO_PKG_NAME"));
    LoaderHint::ModuleName(name.replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            parse_candidates(" a.js,, b.js ,"),
            vec!["a.js".to_owned(), "b.js".to_owned()]
        );
    }

    #[test]
    fn plan_without_build_settings_is_hint_only() {
        let plan = build_plan(None, DEFAULT_HINT_TEMPLATE, None);

        assert_eq!(
            plan.strategies(),
            &[Strategy::Hinted {
                template: DEFAULT_HINT_TEMPLATE.to_owned()
            }]
        );
    }

    #[test]
    fn full_plan_keeps_priority_order() {
        let plan = build_plan(Some("/bundled.js"), "./{name}.js", Some("/a.js,/b.js"));
        let hint = LoaderHint::ModuleName("app".to_owned());

        assert_eq!(
            plan.locations(Some(&hint)),
            vec!["/bundled.js", "./app.js", "/a.js", "/b.js"]
        );
    }

    #[test]
    fn default_hint_uses_the_wasm_bindgen_file_name() {
        match default_loader_hint() {
            LoaderHint::ModuleName(name) => assert!(!name.contains('-')),
            LoaderHint::Url(url) => panic!("unexpected url hint {url}"),
        }
    }
}
