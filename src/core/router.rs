//! Path matching and target selection over the current snapshot.
//!
//! The snapshot's route list is sorted most-specific-first at build time, so
//! matching is a linear scan returning the first hit.
use std::sync::{Arc, atomic::Ordering};

use crate::core::{
    error::GatewayError,
    request::GatewayRequest,
    snapshot::{ConfigSnapshot, RouteDefinition},
};

/// Stateless: every lookup is made against a snapshot the caller pinned.
pub struct Router;

impl Router {
    /// Match against a specific snapshot.
    pub fn match_in(snapshot: &ConfigSnapshot, path: &str) -> Option<Arc<RouteDefinition>> {
        let normalized;
        let path = if path.starts_with('/') {
            path
        } else {
            normalized = format!("/{path}");
            &normalized
        };

        snapshot
            .routes()
            .iter()
            .find(|route| route.pattern.matches(path))
            .cloned()
    }

    /// Round-robin over the route's targets.
    pub fn next_target(route: &RouteDefinition) -> Option<&str> {
        if route.targets.is_empty() {
            return None;
        }
        let index = route.cursor.fetch_add(1, Ordering::Relaxed) % route.targets.len();
        Some(route.targets[index].as_str())
    }

    pub fn build_target_url(
        req: &GatewayRequest,
        route: &RouteDefinition,
    ) -> Result<String, GatewayError> {
        let base = Self::next_target(route).ok_or_else(|| GatewayError::NoTarget {
            route_id: route.id.clone(),
        })?;
        let base = base.strip_suffix('/').unwrap_or(base);

        let path = if route.strip_prefix {
            route.pattern.strip(&req.path)
        } else {
            std::borrow::Cow::Borrowed(req.path.as_str())
        };

        let mut url = String::with_capacity(base.len() + path.len() + 1);
        url.push_str(base);
        url.push_str(&path);
        if let Some(query) = &req.query {
            url.push('?');
            url.push_str(query);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::{
        config::{
            loader::RawDocument,
            models::{GatewayDocument, RouteConfig},
        },
        core::config_store::ConfigStore,
    };

    fn snapshot(routes: Vec<RouteConfig>) -> ConfigSnapshot {
        ConfigSnapshot::build(&GatewayDocument {
            routes,
            ..GatewayDocument::default()
        })
        .expect("valid document")
    }

    #[test]
    fn most_specific_route_wins() {
        let snap = snapshot(vec![
            RouteConfig::new("api", "/api/**").target("http://api"),
            RouteConfig::new("device", "/api/device/**").target("http://device"),
        ]);
        assert_eq!(
            Router::match_in(&snap, "/api/device/data").unwrap().id,
            "device"
        );
        assert_eq!(Router::match_in(&snap, "/api/users").unwrap().id, "api");
        assert!(Router::match_in(&snap, "/other").is_none());
    }

    #[test]
    fn unrooted_paths_are_normalized() {
        let snap = snapshot(vec![RouteConfig::new("a", "/a/**").target("http://a")]);
        assert_eq!(Router::match_in(&snap, "a/b").unwrap().id, "a");
    }

    #[test]
    fn targets_rotate_and_wrap() {
        let snap = snapshot(vec![
            RouteConfig::new("lb", "/lb/**")
                .target("http://one")
                .target("http://two")
                .target("http://three"),
        ]);
        let route = snap.route("lb").unwrap();
        let picked: Vec<&str> = (0..5).map(|_| Router::next_target(route).unwrap()).collect();
        assert_eq!(
            picked,
            vec![
                "http://one",
                "http://two",
                "http://three",
                "http://one",
                "http://two"
            ]
        );
    }

    #[test]
    fn rotation_restarts_with_a_new_snapshot() {
        let store = Arc::new(ConfigStore::new());
        let doc = r#"{"routes":[{"id":"lb","pathPattern":"/lb/**","targets":["http://one","http://two"]}]}"#;
        store.apply_document(&RawDocument::json(doc)).unwrap();

        let route = Router::match_in(&store.current(), "/lb/x").unwrap();
        assert_eq!(Router::next_target(&route), Some("http://one"));

        store
            .apply_document(&RawDocument::json(format!("{doc} ")))
            .unwrap();
        let route = Router::match_in(&store.current(), "/lb/x").unwrap();
        assert_eq!(Router::next_target(&route), Some("http://one"));
    }

    #[test]
    fn strip_prefix_rewrites_path() {
        let snap = snapshot(vec![
            RouteConfig::new("x", "/api/x/**")
                .target("http://backend/")
                .strip_prefix(true),
            RouteConfig::new("keep", "/keep/**").target("http://backend"),
        ]);
        let req = GatewayRequest::new(Method::GET, "/api/x/y/z");
        assert_eq!(
            Router::build_target_url(&req, snap.route("x").unwrap()).unwrap(),
            "http://backend/y/z"
        );

        let req = GatewayRequest::new(Method::GET, "/keep/y/z").with_query(Some("a=1&b=2"));
        assert_eq!(
            Router::build_target_url(&req, snap.route("keep").unwrap()).unwrap(),
            "http://backend/keep/y/z?a=1&b=2"
        );
    }

    #[test]
    fn exact_pattern_strips_to_root() {
        let snap = snapshot(vec![
            RouteConfig::new("status", "/status")
                .target("http://backend")
                .strip_prefix(true),
        ]);
        let req = GatewayRequest::new(Method::GET, "/status");
        assert_eq!(
            Router::build_target_url(&req, snap.route("status").unwrap()).unwrap(),
            "http://backend/"
        );
    }

    #[test]
    fn empty_targets_fail_loudly() {
        let route = RouteDefinition {
            id: "empty".to_string(),
            pattern: crate::core::path_pattern::PathPattern::compile("/e/**").unwrap(),
            targets: Vec::new(),
            strip_prefix: false,
            require_auth: false,
            header_transforms: Vec::new(),
            rate_limit: None,
            breaker: ConfigSnapshot::empty().policies.breaker.clone(),
            cursor: Default::default(),
        };
        let req = GatewayRequest::new(Method::GET, "/e/1");
        assert!(matches!(
            Router::build_target_url(&req, &route),
            Err(GatewayError::NoTarget { .. })
        ));
    }
}
