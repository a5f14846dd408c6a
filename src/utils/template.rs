//! String template rendering utilities.

use std::collections::HashMap;

pub struct TemplateVars;

impl TemplateVars {
    pub const ENVIRONMENT: &'static str = "environment";
    pub const HOST: &'static str = "host";
    pub const REPOSITORY: &'static str = "repository";
    pub const REF: &'static str = "ref";
    pub const DEPLOY_TO: &'static str = "deploy_to";
    pub const RELEASE_PATH: &'static str = "release_path";
    pub const RELEASE_ID: &'static str = "release_id";
    pub const CURRENT_PATH: &'static str = "current_path";
    pub const SHARED_PATH: &'static str = "shared_path";
}

pub fn render_map(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

pub fn is_present(template: &str, key: &str) -> bool {
    let placeholder = format!("{{{{{}}}}}", key);
    template.contains(&placeholder)
}
