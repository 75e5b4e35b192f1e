//! Detection pipeline
//!
//! A `DetectionEngine` runs every strategy over the text for each pattern,
//! drops excluded findings, arbitrates overlaps and rewrites the text. The
//! only asynchronous step is the external entity provider, which is called
//! once per detection and bounded by a timeout.

use crate::arbitration::{arbitrate, filter_excluded};
use crate::config::Config;
use crate::context::{ContextMatcher, ContextSettings};
use crate::exclusions::ExclusionStore;
use crate::external::{address_similarity_matches, entity_matches, is_address_pattern, EntityProvider, ExternalEntity};
use crate::field::FieldMatcher;
use crate::inference::{classify_examples, infer_pattern, ExampleShape};
use crate::pattern::{EntityKind, Match, MatchMethod, Pattern};
use crate::redaction::{redact, RedactionPolicy};
use anyhow::Result;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const EXPLICIT_REGEX_CONFIDENCE: f64 = 0.90;
const INFERRED_REGEX_CONFIDENCE: f64 = 0.85;
const EXAMPLE_CONFIDENCE: f64 = 0.95;
const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(10);

/// The independent ways a pattern can be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Structural,
    Context,
    Field,
    External,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Structural,
        Strategy::Context,
        Strategy::Field,
        Strategy::External,
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionStatistics {
    pub total_matches: usize,
    pub per_method_counts: BTreeMap<MatchMethod, usize>,
    pub average_confidence: f64,
}

impl DetectionStatistics {
    pub fn from_matches(matches: &[Match]) -> Self {
        let mut per_method_counts = BTreeMap::new();
        for m in matches {
            *per_method_counts.entry(m.method).or_insert(0) += 1;
        }
        let average_confidence = if matches.is_empty() {
            0.0
        } else {
            matches.iter().map(|m| m.confidence).sum::<f64>() / matches.len() as f64
        };

        Self {
            total_matches: matches.len(),
            per_method_counts,
            average_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub matches: Vec<Match>,
    pub redacted_text: String,
    pub statistics: DetectionStatistics,
}

/// A pattern with its regexes compiled and its entity kinds resolved for the
/// duration of one call.
struct CompiledPattern<'p> {
    pattern: &'p Pattern,
    explicit: Vec<Regex>,
    inferred: Option<Regex>,
    examples: Vec<Regex>,
    kinds: Vec<EntityKind>,
    /// Entity kind stamped on structural matches when it is unambiguous.
    structural_entity: Option<EntityKind>,
    address: bool,
}

impl<'p> CompiledPattern<'p> {
    fn compile(pattern: &'p Pattern) -> Result<Self> {
        let explicit = pattern
            .explicit_regexes()
            .map(|source| {
                RegexBuilder::new(source)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| anyhow::anyhow!("Invalid regex pattern for '{}': {}", pattern.id, e))
            })
            .collect::<Result<Vec<_>>>()?;

        let shape = classify_examples(&pattern.examples);
        let address = is_address_pattern(pattern);

        let inferred = if explicit.is_empty() && shape != Some(ExampleShape::Address) {
            match infer_pattern(&pattern.examples) {
                Some(inferred) => {
                    debug!("Inferred regex for '{}': {}", pattern.id, inferred.regex);
                    Some(
                        Regex::new(&inferred.regex)
                            .map_err(|e| anyhow::anyhow!("Invalid inferred regex for '{}': {}", pattern.id, e))?,
                    )
                }
                None => None,
            }
        } else {
            None
        };

        let examples = pattern
            .examples
            .iter()
            .filter(|e| !e.trim().is_empty())
            .map(|e| {
                RegexBuilder::new(&regex::escape(e))
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| anyhow::anyhow!("Invalid example for '{}': {}", pattern.id, err))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut kinds = pattern.named_entity_kinds();
        if let Some(kind) = shape.and_then(|s| s.entity_kind()) {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        let structural_entity = shape
            .and_then(|s| s.entity_kind())
            .or_else(|| (kinds.len() == 1).then(|| kinds[0]));

        Ok(Self {
            pattern,
            explicit,
            inferred,
            examples,
            kinds,
            structural_entity,
            address,
        })
    }

    fn structural_matches(&self, text: &str) -> Vec<Match> {
        let mut matches = Vec::new();
        let runs = self
            .explicit
            .iter()
            .map(|r| (r, EXPLICIT_REGEX_CONFIDENCE, MatchMethod::Regex))
            .chain(self.inferred.iter().map(|r| (r, INFERRED_REGEX_CONFIDENCE, MatchMethod::Regex)))
            .chain(self.examples.iter().map(|r| (r, EXAMPLE_CONFIDENCE, MatchMethod::Example)));

        for (regex, confidence, method) in runs {
            for found in regex.find_iter(text) {
                if found.start() == found.end() {
                    continue;
                }
                matches.push(
                    Match::new(text, found.start(), found.end(), method, confidence, self.pattern)
                        .with_entity(self.structural_entity),
                );
            }
        }
        matches
    }
}

/// Per-call state shared by every pattern.
struct Pass<'t> {
    text: &'t str,
    context: ContextMatcher<'t>,
    field: FieldMatcher,
    external: &'t [ExternalEntity],
}

impl<'t> Pass<'t> {
    fn run(&self, strategy: Strategy, compiled: &CompiledPattern<'_>) -> Vec<Match> {
        let text = self.text;
        let pattern = compiled.pattern;
        match strategy {
            Strategy::Structural => compiled.structural_matches(text),
            Strategy::Context => self.context.find_matches(text, pattern, &compiled.kinds),
            Strategy::Field => self.field.find_matches(text, pattern, &compiled.kinds),
            Strategy::External => {
                let mut matches = entity_matches(text, pattern, self.external);
                if compiled.address {
                    matches.extend(address_similarity_matches(text, pattern));
                }
                matches
            }
        }
    }
}

pub struct DetectionEngine {
    context: ContextSettings,
    policy: RedactionPolicy,
    strategies: Vec<Strategy>,
    provider: Option<Arc<dyn EntityProvider>>,
    exclusions: Option<Arc<dyn ExclusionStore>>,
    external_timeout: Duration,
}

impl Default for DetectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionEngine {
    pub fn new() -> Self {
        Self {
            context: ContextSettings::default(),
            policy: RedactionPolicy::default(),
            strategies: Strategy::ALL.to_vec(),
            provider: None,
            exclusions: None,
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
        }
    }

    /// Engine settings from a loaded config. Stores and providers are
    /// attached separately.
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .with_context_settings(config.detection.context_settings())
            .with_redaction_policy(config.redaction.clone())
            .with_external_timeout(config.detection.external_timeout())
    }

    pub fn with_context_settings(mut self, settings: ContextSettings) -> Self {
        self.context = settings;
        self
    }

    pub fn with_redaction_policy(mut self, policy: RedactionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_strategies(mut self, strategies: &[Strategy]) -> Self {
        self.strategies = strategies.to_vec();
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn EntityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_exclusion_store(mut self, store: Arc<dyn ExclusionStore>) -> Self {
        self.exclusions = Some(store);
        self
    }

    pub fn with_external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    pub fn redaction_policy(&self) -> &RedactionPolicy {
        &self.policy
    }

    /// Runs every strategy, including the external provider when one is
    /// attached. Provider failures and timeouts are logged and treated as an
    /// empty response.
    pub async fn detect(&self, text: &str, patterns: &[Pattern]) -> DetectionResult {
        let entities = match (&self.provider, self.strategies.contains(&Strategy::External)) {
            (Some(provider), true) => self.fetch_entities(provider.as_ref(), text).await,
            _ => Vec::new(),
        };
        self.run_pipeline(text, patterns, &entities)
    }

    /// Runs every strategy without consulting the provider. The address
    /// similarity fallback still applies.
    pub fn detect_local(&self, text: &str, patterns: &[Pattern]) -> DetectionResult {
        self.run_pipeline(text, patterns, &[])
    }

    /// Records `rejected` as a false positive of its pattern, so the same text
    /// is never reported for it again.
    pub fn reject_match(&self, rejected: &Match) -> Result<()> {
        let store = self
            .exclusions
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No exclusion store is configured"))?;
        store.append_exclusion(&rejected.pattern_id, &rejected.text)?;
        info!("Excluded '{}' from pattern '{}'", rejected.text, rejected.pattern_id);
        Ok(())
    }

    async fn fetch_entities(&self, provider: &dyn EntityProvider, text: &str) -> Vec<ExternalEntity> {
        match tokio::time::timeout(self.external_timeout, provider.detect_entities(text)).await {
            Ok(Ok(entities)) => {
                debug!("Provider returned {} entities", entities.len());
                entities
            }
            Ok(Err(e)) => {
                warn!("Entity provider failed, continuing without it: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Entity provider timed out after {:?}, continuing without it",
                    self.external_timeout
                );
                Vec::new()
            }
        }
    }

    fn stored_exclusions(&self, patterns: &[Pattern]) -> HashMap<String, Vec<String>> {
        let Some(store) = &self.exclusions else {
            return HashMap::new();
        };
        let ids: Vec<&str> = patterns.iter().map(|p| p.id.as_str()).collect();
        store.exclusions_for_many(&ids).unwrap_or_else(|e| {
            warn!("Failed to read exclusions, using pattern exclusions only: {}", e);
            HashMap::new()
        })
    }

    fn run_pipeline(&self, text: &str, patterns: &[Pattern], entities: &[ExternalEntity]) -> DetectionResult {
        let stored = self.stored_exclusions(patterns);
        let pass = Pass {
            text,
            context: ContextMatcher::new(&self.context, text),
            field: FieldMatcher::new(),
            external: entities,
        };
        if pass.context.is_structured() {
            debug!("Text reads as structured records");
        }

        let mut raw = Vec::new();
        for pattern in patterns {
            let compiled = match CompiledPattern::compile(pattern) {
                Ok(compiled) => compiled,
                Err(e) => {
                    warn!("Skipping pattern '{}': {}", pattern.id, e);
                    continue;
                }
            };

            for strategy in &self.strategies {
                let found = pass.run(*strategy, &compiled);
                debug!("{:?} found {} candidates for '{}'", strategy, found.len(), pattern.id);
                raw.extend(found);
            }
        }

        let candidates = raw.len();
        let matches = arbitrate(filter_excluded(raw, patterns, &stored));
        let redacted_text = redact(text, &matches, &self.policy);
        let statistics = DetectionStatistics::from_matches(&matches);

        info!(
            "Detection finished: {} matches from {} candidates across {} patterns",
            matches.len(),
            candidates,
            patterns.len()
        );

        DetectionResult {
            matches,
            redacted_text,
            statistics,
        }
    }
}
