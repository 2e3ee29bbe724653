//! Robots.txt parsing on top of the robotstxt crate

use robotstxt::DefaultMatcher;

/// Parsed robots.txt rules for one site
#[derive(Debug, Clone, Default)]
pub struct ParsedRobots {
    /// Raw body; `None` means everything is allowed
    body: Option<String>,
}

impl ParsedRobots {
    /// Wraps a fetched robots.txt body
    pub fn from_content(content: &str) -> Self {
        Self {
            body: Some(content.to_string()),
        }
    }

    /// Rules that allow everything
    ///
    /// Used when robots.txt is missing, unreachable or not honored.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Checks whether `url` may be fetched by `user_agent`
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL or path to check
    /// * `user_agent` - Full user agent string; only its product token is matched
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match self.body.as_deref() {
            None | Some("") => true,
            Some(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, product_token(user_agent), url)
            }
        }
    }

    /// Crawl-delay in seconds for `user_agent`
    ///
    /// A group naming the agent takes precedence over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let body = self.body.as_deref()?;
        let token = product_token(user_agent).to_lowercase();

        let mut group_agents: Vec<String> = Vec::new();
        let mut in_rules = false;
        let mut specific = None;
        let mut wildcard = None;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "user-agent" => {
                    if in_rules {
                        group_agents.clear();
                        in_rules = false;
                    }
                    group_agents.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_rules = true;
                    let Ok(delay) = value.parse::<f64>() else {
                        continue;
                    };
                    if group_agents.iter().any(|agent| *agent == token) {
                        specific.get_or_insert(delay);
                    } else if group_agents.iter().any(|agent| agent == "*") {
                        wildcard.get_or_insert(delay);
                    }
                }
                _ => in_rules = true,
            }
        }

        specific.or(wildcard)
    }
}

/// Product token of a user agent ("sumi-harvest/0.1 (+info)" -> "sumi-harvest")
fn product_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or(user_agent)
}
