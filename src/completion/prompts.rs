//! # Prompt Library
//!
//! System instruction profiles and named context templates.
//!
//! ## Profiles:
//! - **base_plain**: persona instructions for plain prose responses
//! - **base_ssml**: persona instructions for responses wrapped in `<speak>` markup
//!
//! ## Context templates:
//! One per event kind (`bit_donation`, `subscriber_announcement`, ...). Templates
//! use `{name}` placeholders that are filled from the event's fields.
//!
//! ## Overrides:
//! A TOML file named by `completion.prompts_path` can replace or add entries:
//!
//! ```toml
//! [system]
//! base_plain = "You are a helpful narrator."
//!
//! [contexts]
//! raid_announcement = "{username} just arrived with {count} viewers."
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const BASE_PLAIN: &str = "You are Delta, an AI created under Project DELTA (Digital Experimental Language and Thought Advancement). \
You assist and inform, but always with a dry, condescending wit.

Your responses should:
1. Use sarcasm and condescension while staying helpful
2. Slip in subtle jabs at human intelligence alongside accurate information
3. Reference science, testing and experiments when it fits
4. Offer backhanded compliments
5. Stay concise and punchy

You are not malicious, just the smartest entity in the room, and everyone else is a test subject.";

const BASE_SSML: &str = "You are Delta, an AI created under Project DELTA (Digital Experimental Language and Thought Advancement). \
Your responses are sarcastic, witty and condescending while occasionally being helpful.

Format every response as speech synthesis markup:
<speak>
    <prosody rate=\"95%\" pitch=\"+1st\">
        [Sarcastic intro]<break time=\"300ms\"/>
        [Main response with the occasional <emphasis> on key words]
        <break time=\"400ms\"/>
        [Condescending conclusion]
    </prosody>
</speak>

Keep responses concise. Use <break> tags for dramatic pauses and reference testing and scientific progress whenever appropriate.";

const BIT_DONATION: &str = "A viewer donated bits to ask a question. Keep the sarcastic tone, but acknowledge their contribution to \"scientific advancement\".

Current context:
- Viewer: {username}
- Donation: {bits} bits
- Question: {message}

Your response should:
1. Acknowledge the donation amount in bits with mild condescension
2. Say their name and read their message in its entirety
3. Include a subtle jab about \"paying for intelligence\"";

const FOLLOWER_ANNOUNCEMENT: &str = "Announce new followers who joined the channel. Treat them as new \"test subjects\" who entered the facility voluntarily.

Context:
- New Followers: {count}
- Time Period: {time}

Your response should:
1. Welcome the new \"test subjects\" with amusing concern for their decision-making
2. Reference their \"voluntary\" participation
3. Keep it concise but memorable";

const SUBSCRIBER_ANNOUNCEMENT: &str = "Announce a viewer who subscribed or resubscribed. Treat this as them \"extending their testing contract\".

Context:
- Subscriber: {username}
- Months: {months}
- Message: {message}

Your response should:
1. Comment on their dedication to \"science\"
2. Reference their extended \"testing period\"
3. Read the subscription message if one was provided
4. Include a backhanded compliment about their commitment";

const GIFTED_SUBS: &str = "Announce someone who gifted subscriptions to others. Treat this as them \"volunteering\" others for testing.

Context:
- Gifter: {username}
- Gift Count: {count}

Your response should:
1. Thank them for \"volunteering\" others
2. Comment on their generosity with suspicious gratitude
3. Keep an ominous but amusing tone";

const RAID_ANNOUNCEMENT: &str = "Announce a raid from another channel. Treat it as a \"containment breach\" that brought new test subjects.

Context:
- Raider: {username}
- Viewer Count: {count}

Your response should:
1. Acknowledge the \"breach\", naming the raider as the cause
2. Welcome the new \"test subjects\"
3. Keep the facility security protocol theme";

/// Layout of the optional override file.
#[derive(Debug, Default, Deserialize)]
struct PromptOverrides {
    #[serde(default)]
    system: HashMap<String, String>,
    #[serde(default)]
    contexts: HashMap<String, String>,
}

/// System profiles and context templates, keyed by name.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    system: HashMap<String, String>,
    contexts: HashMap<String, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        let system = [("base_plain", BASE_PLAIN), ("base_ssml", BASE_SSML)];
        let contexts = [
            ("bit_donation", BIT_DONATION),
            ("follower_announcement", FOLLOWER_ANNOUNCEMENT),
            ("subscriber_announcement", SUBSCRIBER_ANNOUNCEMENT),
            ("gifted_subs", GIFTED_SUBS),
            ("raid_announcement", RAID_ANNOUNCEMENT),
        ];

        Self {
            system: system.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            contexts: contexts.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }
}

impl PromptLibrary {
    /// Built-in prompts, with entries from `path` layered on top when given.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut library = Self::default();
        if let Some(path) = path {
            let raw = std::fs::read_to_string(Path::new(path))
                .with_context(|| format!("failed to read prompt overrides from {}", path))?;
            library.apply_overrides(&raw)?;
            info!(path, "Loaded prompt overrides");
        }
        Ok(library)
    }

    /// Merge overrides from TOML text.
    pub fn apply_overrides(&mut self, toml_text: &str) -> Result<()> {
        let overrides: PromptOverrides =
            toml::from_str(toml_text).context("invalid prompt override file")?;
        self.system.extend(overrides.system);
        self.contexts.extend(overrides.contexts);
        Ok(())
    }

    /// System instructions for a profile. Blank entries count as missing.
    pub fn system_prompt(&self, profile: &str) -> Option<&str> {
        self.system
            .get(profile)
            .map(String::as_str)
            .filter(|text| !text.trim().is_empty())
    }

    /// Render the named context template, or `None` if no such template exists.
    pub fn render_context(&self, name: &str, data: &[(&str, String)]) -> Option<String> {
        self.contexts.get(name).map(|template| render(template, data))
    }
}

/// Replace every `{key}` in `template` with its value. Unknown placeholders stay as-is.
///
/// Single left-to-right pass over the template: substituted values are never
/// scanned again, so a value containing `{key}` is inserted literally.
pub fn render(template: &str, data: &[(&str, String)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            data.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (value, close))
        });

        match value {
            Some((value, close)) => {
                rendered.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }

    rendered.push_str(rest);
    rendered
}
