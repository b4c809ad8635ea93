use crate::{
    authz::{ActionPattern, PolicyError},
    config::DispatchConfig,
};

/// Maps task names to broker queues.
///
/// Routes use the dotted action-pattern syntax and are checked in order; the
/// first match wins. Unmatched tasks go to the default queue.
#[derive(Debug, Clone)]
pub struct TaskRouter {
    routes: Vec<(ActionPattern, String)>,
    default_queue: String,
}

impl TaskRouter {
    pub fn new(default_queue: impl Into<String>) -> Self {
        Self {
            routes: Vec::new(),
            default_queue: default_queue.into(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self, PolicyError> {
        config
            .routes
            .iter()
            .try_fold(Self::new(&config.default_queue), |router, route| {
                router.route(&route.pattern, &route.queue)
            })
    }

    /// Append a route.
    pub fn route(mut self, pattern: &str, queue: impl Into<String>) -> Result<Self, PolicyError> {
        self.routes.push((ActionPattern::parse(pattern)?, queue.into()));
        Ok(self)
    }

    pub fn queue_for(&self, task_name: &str) -> &str {
        self.routes
            .iter()
            .find(|(pattern, _)| pattern.matches(task_name))
            .map(|(_, queue)| queue.as_str())
            .unwrap_or(&self.default_queue)
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::config::RouteConfig;

    fn router() -> TaskRouter {
        TaskRouter::new("celery")
            .route("export.pdf", "pdf")
            .unwrap()
            .route("export.*", "export")
            .unwrap()
            .route("*.reindex", "search")
            .unwrap()
    }

    #[rstest]
    #[case("export.pdf", "pdf")]
    #[case("export.csv", "export")]
    #[case("party.reindex", "search")]
    #[case("export.reindex", "export")]
    #[case("notify.email", "celery")]
    #[case("export", "celery")]
    #[case("export.pdf.large", "celery")]
    fn test_first_match_wins(#[case] task: &str, #[case] queue: &str) {
        assert_eq!(router().queue_for(task), queue);
    }

    #[test]
    fn test_from_config() {
        let config = DispatchConfig {
            default_queue: "main".into(),
            routes: vec![RouteConfig {
                pattern: "import.*".into(),
                queue: "import".into(),
            }],
            ..Default::default()
        };
        let router = TaskRouter::from_config(&config).unwrap();
        assert_eq!(router.queue_for("import.shapefile"), "import");
        assert_eq!(router.queue_for("export.pdf"), "main");
        assert_eq!(router.default_queue(), "main");
    }

    #[test]
    fn test_invalid_route_rejected() {
        assert!(TaskRouter::new("celery").route("export.**", "x").is_err());
    }
}
