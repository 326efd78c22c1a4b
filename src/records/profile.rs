use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A social-media profile awaiting a generated description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub username: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub engagement: f64,
    #[serde(default)]
    pub hashtags: String,
    /// Any other frontmatter keys, written back untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileRecord {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            fullname: String::new(),
            bio: String::new(),
            location: String::new(),
            followers: 0,
            engagement: 0.0,
            hashtags: String::new(),
            extra: Map::new(),
        }
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = bio.into();
        self
    }

    pub fn with_fullname(mut self, fullname: impl Into<String>) -> Self {
        self.fullname = fullname.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_hashtags(mut self, hashtags: impl Into<String>) -> Self {
        self.hashtags = hashtags.into();
        self
    }

    pub fn with_followers(mut self, followers: u64) -> Self {
        self.followers = followers;
        self
    }

    /// Pretty JSON rendering embedded in prompts.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{{\"username\":\"{}\"}}", self.username))
    }

    /// Copy of the record carrying a generated description.
    pub fn with_description(&self, description: &str) -> Self {
        let mut updated = self.clone();
        updated
            .extra
            .insert("description".to_string(), Value::String(description.to_string()));
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults_and_extra() {
        let yaml = "username: jdoe\nfollowers: 1200\ncategory: food\n";
        let profile: ProfileRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.username, "jdoe");
        assert_eq!(profile.followers, 1200);
        assert_eq!(profile.bio, "");
        assert_eq!(profile.extra.get("category"), Some(&Value::String("food".into())));
    }

    #[test]
    fn test_missing_username_is_error() {
        let result: Result<ProfileRecord, _> = serde_yaml::from_str("bio: hello\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_with_description_preserves_fields() {
        let profile = ProfileRecord::new("jdoe").with_bio("Chef");
        let updated = profile.with_description("A chef.");
        assert_eq!(updated.bio, "Chef");
        assert_eq!(updated.extra["description"], "A chef.");
        assert!(profile.extra.is_empty());
    }

    #[test]
    fn test_prompt_json_contains_fields() {
        let json = ProfileRecord::new("jdoe").with_location("Oslo").to_prompt_json();
        assert!(json.contains("\"username\": \"jdoe\""));
        assert!(json.contains("\"location\": \"Oslo\""));
    }
}
