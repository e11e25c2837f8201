//! Handler registry: call identifier pattern → handler(s).
//!
//! Starts in literal mode (exact identifier lookup). The first regex
//! registration switches the whole registry to pattern mode and recompiles
//! every literal already registered into an anchored equivalent, so lookups
//! from then on scan all entries and return every match in registration
//! order. Registrations are append-only.
//!
//! Not synchronized; the session wraps it in a lock.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;

use crate::error::RegistryError;

/// How a registration selects identifiers.
#[derive(Clone)]
pub enum Pattern {
    /// Exact identifier match.
    Literal(String),
    /// Regex matched at the start of the identifier.
    Compiled { source: String, regex: Regex },
}

impl Pattern {
    pub fn literal(identifier: impl Into<String>) -> Self {
        Pattern::Literal(identifier.into())
    }

    /// Compile a prefix-anchored regex (`ping\.get` matches `ping.getIP`).
    pub fn regex(source: &str) -> Result<Self, RegistryError> {
        let regex = Regex::new(&format!("^(?:{source})")).map_err(|e| {
            RegistryError::InvalidPattern {
                pattern: source.to_owned(),
                source: e,
            }
        })?;
        Ok(Pattern::Compiled {
            source: source.to_owned(),
            regex,
        })
    }

    pub fn matches(&self, identifier: &str) -> bool {
        match self {
            Pattern::Literal(lit) => lit == identifier,
            Pattern::Compiled { regex, .. } => regex.is_match(identifier),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Literal(lit) => lit,
            Pattern::Compiled { source, .. } => source,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Pattern::Literal(_))
    }

    /// Equivalent compiled form. A literal becomes `^escaped$`, so it still
    /// matches only its own identifier.
    fn into_compiled(self) -> Pattern {
        match self {
            Pattern::Literal(lit) => {
                let anchored = format!("^{}$", regex::escape(&lit));
                match Regex::new(&anchored) {
                    Ok(regex) => Pattern::Compiled { source: anchored, regex },
                    // An escaped literal always compiles; keep exact matching if not.
                    Err(_) => Pattern::Literal(lit),
                }
            }
            compiled @ Pattern::Compiled { .. } => compiled,
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(lit) => f.debug_tuple("Literal").field(lit).finish(),
            Pattern::Compiled { source, .. } => f.debug_tuple("Compiled").field(source).finish(),
        }
    }
}

struct Registration<H> {
    pattern: Pattern,
    handler: H,
}

/// Registry of visualization handlers plus trace targets.
pub struct HandlerRegistry<H> {
    entries: Vec<Registration<H>>,
    /// Literal mode index: identifier → entry positions, in registration order.
    literal_index: HashMap<String, Vec<usize>>,
    pattern_mode: bool,
    trace_targets: Vec<String>,
}

impl<H: Clone> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            literal_index: HashMap::new(),
            pattern_mode: false,
            trace_targets: Vec::new(),
        }
    }

    /// Store a handler and apply the literal → pattern mode switch.
    pub fn register(&mut self, pattern: Pattern, handler: H) {
        if !pattern.is_literal() && !self.pattern_mode {
            self.enter_pattern_mode();
        }

        let pattern = if self.pattern_mode {
            pattern.into_compiled()
        } else {
            pattern
        };

        if let Pattern::Literal(ref lit) = pattern {
            self.literal_index
                .entry(lit.clone())
                .or_default()
                .push(self.entries.len());
        }
        self.entries.push(Registration { pattern, handler });
    }

    /// Convenience for `register(Pattern::regex(source)?, handler)`.
    pub fn register_regex(&mut self, source: &str, handler: H) -> Result<(), RegistryError> {
        let pattern = Pattern::regex(source)?;
        self.register(pattern, handler);
        Ok(())
    }

    fn enter_pattern_mode(&mut self) {
        self.pattern_mode = true;
        self.literal_index.clear();
        for entry in &mut self.entries {
            let pattern = std::mem::replace(&mut entry.pattern, Pattern::Literal(String::new()));
            entry.pattern = pattern.into_compiled();
        }
    }

    /// Every handler whose pattern selects `identifier`, in registration order.
    pub fn lookup(&self, identifier: &str) -> Vec<H> {
        if self.pattern_mode {
            return self
                .entries
                .iter()
                .filter(|e| e.pattern.matches(identifier))
                .map(|e| e.handler.clone())
                .collect();
        }
        self.literal_index
            .get(identifier)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&i| self.entries[i].handler.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Add a trace target prefix.
    pub fn trace(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if !self.trace_targets.contains(&prefix) {
            self.trace_targets.push(prefix);
        }
    }

    /// First trace target that `identifier` starts with.
    pub fn trace_target_for(&self, identifier: &str) -> Option<&str> {
        self.trace_targets
            .iter()
            .find(|prefix| identifier.starts_with(prefix.as_str()))
            .map(String::as_str)
    }

    #[must_use]
    pub fn pattern_mode(&self) -> bool {
        self.pattern_mode
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered patterns in registration order (as currently compiled).
    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.entries.iter().map(|e| &e.pattern)
    }
}

impl<H: Clone> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
