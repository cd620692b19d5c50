#![forbid(unsafe_code)]

//! Table-driven phrasing of decisions, reasons and counterfactuals.
//!
//! A [`TemplateSet`] maps canonical keys (see [`TemplateKey`]) to text with `{name}`
//! placeholders. Every set is checked for coverage when loaded; rendering never falls back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use engage_kernel_contracts::decision::{Action, Decision};
use engage_kernel_contracts::person::PersonId;
use serde::{Deserialize, Serialize};

use crate::discretize::DiscreteLevel;
use crate::explain::{FoilShape, ReasonShape};
use crate::observation::VariableKind;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template set `{set}` has no entry for `{key}`")]
    Missing { set: String, key: String },
    #[error("template set `{set}` has unknown key `{key}`")]
    UnknownKey { set: String, key: String },
    #[error("invalid template table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown language `{0}`")]
    UnknownLanguage(String),
    #[error("action {0} has no phrasing")]
    Unrenderable(Action),
    #[error("variable `{0}` has no phrasing")]
    UnrenderableVariable(VariableKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    English,
    Catalan,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::English, Language::Catalan];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Catalan => "catalan",
        }
    }
}

impl FromStr for Language {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Language::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TemplateError::UnknownLanguage(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tense {
    Past,
    Conditional,
    Future,
}

impl Tense {
    pub const ALL: [Tense; 3] = [Tense::Past, Tense::Conditional, Tense::Future];

    fn slug(self) -> &'static str {
        match self {
            Tense::Past => "past",
            Tense::Conditional => "conditional",
            Tense::Future => "future",
        }
    }
}

/// Sentence frames that stitch rendered pieces together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Connective {
    /// `{outcome}`, `{reason}`
    Because,
    /// `{outcome}`, `{reason}`, `{confidence}`
    BecauseUncertain,
    /// `{foil}`, `{outcome}`
    Counterfactual,
    /// `{first}`, `{second}`
    Alternatives,
    /// `{id}`
    Subject,
}

impl Connective {
    pub const ALL: [Connective; 5] = [
        Connective::Because,
        Connective::BecauseUncertain,
        Connective::Counterfactual,
        Connective::Alternatives,
        Connective::Subject,
    ];

    fn slug(self) -> &'static str {
        match self {
            Connective::Because => "because",
            Connective::BecauseUncertain => "because_uncertain",
            Connective::Counterfactual => "counterfactual",
            Connective::Alternatives => "alternatives",
            Connective::Subject => "subject",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemplateKey {
    Outcome { action: Action, tense: Tense },
    Reason { variable: VariableKind, shape: ReasonShape },
    Foil { variable: VariableKind, shape: FoilShape },
    Connective(Connective),
}

/// Actions any decision maker can produce.
const PHRASED_ACTIONS: [Action; 4] = [
    Action::Nothing,
    Action::Wait,
    Action::ElicitGeneral,
    Action::ElicitTarget,
];

impl TemplateKey {
    /// Every key a table must hold to explain decisions over `variables`.
    ///
    /// `Waiting` is always included. Only normalized variables can be phrased.
    pub fn reachable(variables: &[VariableKind]) -> Result<BTreeSet<TemplateKey>, TemplateError> {
        use DiscreteLevel::{Full, High, Low, None as Zero};

        let mut keys = BTreeSet::new();
        for action in PHRASED_ACTIONS {
            for tense in Tense::ALL {
                keys.insert(TemplateKey::Outcome { action, tense });
            }
        }
        for c in Connective::ALL {
            keys.insert(TemplateKey::Connective(c));
        }
        for b in [true, false] {
            keys.insert(TemplateKey::Reason {
                variable: VariableKind::Waiting,
                shape: ReasonShape::Flag(b),
            });
            keys.insert(TemplateKey::Foil {
                variable: VariableKind::Waiting,
                shape: FoilShape::Flag(b),
            });
        }

        for &variable in variables {
            if variable == VariableKind::Waiting {
                continue;
            }
            if !variable.feature().is_some_and(|f| f.is_normalized()) {
                return Err(TemplateError::UnrenderableVariable(variable));
            }
            let reasons = DiscreteLevel::ALL
                .into_iter()
                .map(ReasonShape::Exact)
                .chain([Low, High, Full].map(ReasonShape::Below))
                .chain([Zero, Low, High].map(ReasonShape::Above));
            for shape in reasons {
                keys.insert(TemplateKey::Reason { variable, shape });
            }
            let foils = DiscreteLevel::ALL
                .into_iter()
                .map(FoilShape::Single)
                .chain([Low, High].map(FoilShape::AtMost))
                .chain([Low, High].map(FoilShape::AtLeast))
                .chain([FoilShape::Within(Low, High)]);
            for shape in foils {
                keys.insert(TemplateKey::Foil { variable, shape });
            }
        }
        Ok(keys)
    }

    /// Keys over every variable that can be phrased at all.
    pub fn catalog() -> BTreeSet<TemplateKey> {
        let phrasable: Vec<VariableKind> = VariableKind::PERSON_VARIABLES
            .into_iter()
            .filter(|v| v.feature().is_some_and(|f| f.is_normalized()))
            .collect();
        TemplateKey::reachable(&phrasable).unwrap_or_default()
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKey::Outcome { action, tense } => write!(
                f,
                "outcome.{}.{}",
                action.as_str().to_ascii_lowercase(),
                tense.slug()
            ),
            TemplateKey::Reason { variable, shape } => {
                write!(f, "reason.{}.", variable.slug())?;
                match shape {
                    ReasonShape::Flag(b) => write!(f, "flag.{b}"),
                    ReasonShape::Exact(l) => write!(f, "exact.{}", l.as_str()),
                    ReasonShape::Below(l) => write!(f, "below.{}", l.as_str()),
                    ReasonShape::Above(l) => write!(f, "above.{}", l.as_str()),
                }
            }
            TemplateKey::Foil { variable, shape } => {
                write!(f, "foil.{}.", variable.slug())?;
                match shape {
                    FoilShape::Flag(b) => write!(f, "flag.{b}"),
                    FoilShape::Single(l) => write!(f, "single.{}", l.as_str()),
                    FoilShape::AtMost(l) => write!(f, "at_most.{}", l.as_str()),
                    FoilShape::AtLeast(l) => write!(f, "at_least.{}", l.as_str()),
                    FoilShape::Within(lo, hi) => {
                        write!(f, "within.{}.{}", lo.as_str(), hi.as_str())
                    }
                }
            }
            TemplateKey::Connective(c) => write!(f, "connective.{}", c.slug()),
        }
    }
}

/// Optional display names for tracked people.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonNames(BTreeMap<PersonId, String>);

impl PersonNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: PersonId, name: impl Into<String>) {
        self.0.insert(id, name.into());
    }

    pub fn get(&self, id: &PersonId) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }
}

impl FromIterator<(PersonId, String)> for PersonNames {
    fn from_iter<I: IntoIterator<Item = (PersonId, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Deserialize)]
struct TemplateTable {
    name: String,
    templates: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    name: String,
    templates: BTreeMap<String, String>,
}

impl TemplateSet {
    pub fn builtin(language: Language) -> Self {
        let table: &[(&str, &str)] = match language {
            Language::English => ENGLISH,
            Language::Catalan => CATALAN,
        };
        Self {
            name: language.as_str().to_string(),
            templates: table
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Parses a JSON table `{"name": .., "templates": {key: text}}` and checks that it covers
    /// everything reachable for `variables`.
    pub fn from_json(json: &str, variables: &[VariableKind]) -> Result<Self, TemplateError> {
        let table: TemplateTable = serde_json::from_str(json)?;
        let set = Self {
            name: table.name,
            templates: table.templates,
        };
        set.validate_keys()?;
        set.validate_coverage(variables)?;
        Ok(set)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn validate_coverage(&self, variables: &[VariableKind]) -> Result<(), TemplateError> {
        for key in TemplateKey::reachable(variables)? {
            self.get(key)?;
        }
        Ok(())
    }

    fn validate_keys(&self) -> Result<(), TemplateError> {
        let known: BTreeSet<String> =
            TemplateKey::catalog().iter().map(|k| k.to_string()).collect();
        match self.templates.keys().find(|k| !known.contains(*k)) {
            Some(key) => Err(TemplateError::UnknownKey {
                set: self.name.clone(),
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn get(&self, key: TemplateKey) -> Result<&str, TemplateError> {
        let k = key.to_string();
        self.templates
            .get(&k)
            .map(String::as_str)
            .ok_or(TemplateError::Missing {
                set: self.name.clone(),
                key: k,
            })
    }

    fn fill(&self, key: TemplateKey, args: &[(&str, &str)]) -> Result<String, TemplateError> {
        let mut text = self.get(key)?.to_string();
        for (name, value) in args {
            text = text.replace(&format!("{{{name}}}"), value);
        }
        Ok(text)
    }

    pub fn subject(&self, id: &PersonId, names: &PersonNames) -> Result<String, TemplateError> {
        match names.get(id) {
            Some(name) => Ok(name.to_string()),
            None => self.fill(
                TemplateKey::Connective(Connective::Subject),
                &[("id", id.as_str())],
            ),
        }
    }

    pub fn outcome(
        &self,
        decision: &Decision,
        tense: Tense,
        names: &PersonNames,
    ) -> Result<String, TemplateError> {
        let action = decision.action();
        if !PHRASED_ACTIONS.contains(&action) {
            return Err(TemplateError::Unrenderable(action));
        }
        let target = match decision.target() {
            Some(t) => self.subject(t, names)?,
            None => String::new(),
        };
        self.fill(
            TemplateKey::Outcome { action, tense },
            &[("target", target.as_str())],
        )
    }

    pub fn reason(
        &self,
        variable: VariableKind,
        shape: ReasonShape,
        subject: &str,
    ) -> Result<String, TemplateError> {
        self.fill(
            TemplateKey::Reason { variable, shape },
            &[("subject", subject)],
        )
    }

    /// Phrases one or more counterfactual runs as alternatives.
    pub fn foil(
        &self,
        variable: VariableKind,
        shapes: &[FoilShape],
        subject: &str,
    ) -> Result<String, TemplateError> {
        let mut parts = shapes.iter().map(|shape| {
            self.fill(
                TemplateKey::Foil {
                    variable,
                    shape: *shape,
                },
                &[("subject", subject)],
            )
        });
        let Some(first) = parts.next() else {
            return Err(TemplateError::Missing {
                set: self.name.clone(),
                key: format!("foil.{}", variable.slug()),
            });
        };
        parts.try_fold(first?, |acc, next| {
            self.fill(
                TemplateKey::Connective(Connective::Alternatives),
                &[("first", acc.as_str()), ("second", next?.as_str())],
            )
        })
    }

    pub fn connect(
        &self,
        connective: Connective,
        args: &[(&str, &str)],
    ) -> Result<String, TemplateError> {
        self.fill(TemplateKey::Connective(connective), args).map(|s| sentence_case(&s))
    }
}

/// Upper-cases the first character.
pub fn sentence_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

const ENGLISH: &[(&str, &str)] = &[
    ("outcome.nothing.past", "I did nothing"),
    ("outcome.nothing.conditional", "I would have done nothing"),
    ("outcome.nothing.future", "I will do nothing"),
    ("outcome.wait.past", "I was waiting to finish what I was doing"),
    ("outcome.wait.conditional", "I would have finished what I was doing"),
    ("outcome.wait.future", "I will wait to finish what I am doing"),
    ("outcome.elicit_general.past", "I tried to get someone to talk to me"),
    ("outcome.elicit_general.conditional", "I would have tried to get someone to talk to me"),
    ("outcome.elicit_general.future", "I will try to get someone to talk to me"),
    ("outcome.elicit_target.past", "I tried to talk to {target}"),
    ("outcome.elicit_target.conditional", "I would have tried to get {target} to talk to me"),
    ("outcome.elicit_target.future", "I will try to talk to {target}"),
    ("connective.because", "{outcome} because {reason}."),
    ("connective.because_uncertain", "{outcome} because {reason}, and {confidence}."),
    ("connective.counterfactual", "{foil}, {outcome}."),
    ("connective.alternatives", "{first}, or {second}"),
    ("connective.subject", "person {id}"),
    ("reason.waiting.flag.true", "I was doing something else"),
    ("reason.waiting.flag.false", "I was not doing anything else"),
    ("foil.waiting.flag.true", "if I had been doing something else"),
    ("foil.waiting.flag.false", "if I had not been doing something else"),
    // Mutual gaze
    ("reason.mutual_gaze.exact.none", "{subject} was not looking at me at all"),
    ("reason.mutual_gaze.exact.low", "{subject} was not looking at me"),
    ("reason.mutual_gaze.exact.high", "{subject} was looking at me a little"),
    ("reason.mutual_gaze.exact.full", "{subject} and I were looking directly at each other"),
    ("reason.mutual_gaze.below.low", "{subject} was not looking at me at all"),
    ("reason.mutual_gaze.below.high", "{subject} was not looking at me"),
    ("reason.mutual_gaze.below.full", "{subject} and I were not looking directly at each other"),
    ("reason.mutual_gaze.above.none", "{subject} was not looking away from me"),
    ("reason.mutual_gaze.above.low", "{subject} was looking at me"),
    ("reason.mutual_gaze.above.high", "{subject} and I were looking directly at each other"),
    ("foil.mutual_gaze.single.none", "if {subject} had not looked at me at all"),
    ("foil.mutual_gaze.single.low", "if {subject} had not looked at me"),
    ("foil.mutual_gaze.single.high", "if {subject} had looked at me a little"),
    ("foil.mutual_gaze.single.full", "if {subject} and I had looked directly at each other"),
    ("foil.mutual_gaze.at_most.low", "if {subject} had not been looking at me"),
    (
        "foil.mutual_gaze.at_most.high",
        "if {subject} and I had not been looking directly at each other",
    ),
    ("foil.mutual_gaze.at_least.low", "if {subject} had been looking at me at least a little"),
    ("foil.mutual_gaze.at_least.high", "if {subject} had been looking at me"),
    (
        "foil.mutual_gaze.within.low.high",
        "if {subject} had been looking at me a little but not directly",
    ),
    // Engagement value
    ("reason.engagement_value.exact.none", "{subject} was not interested in me at all"),
    ("reason.engagement_value.exact.low", "{subject} was not interested in me"),
    ("reason.engagement_value.exact.high", "{subject} was interested in me"),
    ("reason.engagement_value.exact.full", "{subject} was very interested in me"),
    ("reason.engagement_value.below.low", "{subject} was not interested in me at all"),
    ("reason.engagement_value.below.high", "{subject} was not interested in me"),
    ("reason.engagement_value.below.full", "{subject} was not very interested in me"),
    ("reason.engagement_value.above.none", "{subject} was a little interested in me"),
    ("reason.engagement_value.above.low", "{subject} was interested in me"),
    ("reason.engagement_value.above.high", "{subject} was very interested in me"),
    ("foil.engagement_value.single.none", "if {subject} had not been interested in me at all"),
    ("foil.engagement_value.single.low", "if {subject} had not been interested in me"),
    ("foil.engagement_value.single.high", "if {subject} had been a little interested in me"),
    ("foil.engagement_value.single.full", "if {subject} had been very interested in me"),
    ("foil.engagement_value.at_most.low", "if {subject} had not been interested in me"),
    ("foil.engagement_value.at_most.high", "if {subject} had not been very interested in me"),
    ("foil.engagement_value.at_least.low", "if {subject} had been a little interested in me"),
    ("foil.engagement_value.at_least.high", "if {subject} had been interested in me"),
    (
        "foil.engagement_value.within.low.high",
        "if {subject} had been neither very interested nor very uninterested in me",
    ),
    // Pose estimation confidence
    (
        "reason.pose_confidence.exact.none",
        "I was very unsure of my skeleton detection of {subject}",
    ),
    ("reason.pose_confidence.exact.low", "I was not sure of my skeleton detection of {subject}"),
    ("reason.pose_confidence.exact.high", "I was sure of my skeleton detection of {subject}"),
    ("reason.pose_confidence.exact.full", "I was very sure of my skeleton detection of {subject}"),
    ("reason.pose_confidence.below.low", "I was very unsure of my skeleton detection of {subject}"),
    ("reason.pose_confidence.below.high", "I was not sure of my skeleton detection of {subject}"),
    (
        "reason.pose_confidence.below.full",
        "I was not very sure of my skeleton detection of {subject}",
    ),
    (
        "reason.pose_confidence.above.none",
        "I was at least a little sure of my skeleton detection of {subject}",
    ),
    ("reason.pose_confidence.above.low", "I was sure of my skeleton detection of {subject}"),
    ("reason.pose_confidence.above.high", "I was very sure of my skeleton detection of {subject}"),
    (
        "foil.pose_confidence.single.none",
        "if I had been very unsure of my skeleton detection of {subject}",
    ),
    (
        "foil.pose_confidence.single.low",
        "if I had not been sure of my skeleton detection of {subject}",
    ),
    (
        "foil.pose_confidence.single.high",
        "if I had been sure of my skeleton detection of {subject}",
    ),
    (
        "foil.pose_confidence.single.full",
        "if I had been very sure of my skeleton detection of {subject}",
    ),
    (
        "foil.pose_confidence.at_most.low",
        "if I had not been sure of my skeleton detection of {subject}",
    ),
    (
        "foil.pose_confidence.at_most.high",
        "if I had not been very sure of my skeleton detection of {subject}",
    ),
    (
        "foil.pose_confidence.at_least.low",
        "if I had been at least a little sure of my skeleton detection of {subject}",
    ),
    (
        "foil.pose_confidence.at_least.high",
        "if I had been sure of my skeleton detection of {subject}",
    ),
    (
        "foil.pose_confidence.within.low.high",
        "if I had been neither very sure nor very unsure of my skeleton detection of {subject}",
    ),
];

const CATALAN: &[(&str, &str)] = &[
    ("outcome.nothing.past", "No he fet res"),
    ("outcome.nothing.conditional", "jo no hauria fet res"),
    ("outcome.nothing.future", "No faré res"),
    ("outcome.wait.past", "Jo estava esperant per acabar el que estava fent"),
    ("outcome.wait.conditional", "jo hauria acabat el que estava fent"),
    ("outcome.wait.future", "Esperaré a acabar el que estic fent"),
    ("outcome.elicit_general.past", "He intentat que algú parlés amb mi"),
    ("outcome.elicit_general.conditional", "jo hauria intentat que algú parlés amb mi"),
    ("outcome.elicit_general.future", "Intentaré que algú parli amb mi"),
    ("outcome.elicit_target.past", "He intentat parlar amb {target}"),
    ("outcome.elicit_target.conditional", "jo hauria intentat que {target} parlés amb mi"),
    ("outcome.elicit_target.future", "Intentaré parlar amb {target}"),
    ("connective.because", "{outcome} perquè {reason}."),
    ("connective.because_uncertain", "{outcome} perquè {reason}, i {confidence}."),
    ("connective.counterfactual", "{foil}, {outcome}."),
    ("connective.alternatives", "{first}, o {second}"),
    ("connective.subject", "la persona {id}"),
    ("reason.waiting.flag.true", "estava fent una altra cosa"),
    ("reason.waiting.flag.false", "no estava fent res més"),
    ("foil.waiting.flag.true", "si estigués fent una altra cosa"),
    ("foil.waiting.flag.false", "si no estigués fent una altra cosa"),
    // Mutual gaze
    ("reason.mutual_gaze.exact.none", "{subject} no em mirava gens"),
    ("reason.mutual_gaze.exact.low", "{subject} no em mirava"),
    ("reason.mutual_gaze.exact.high", "{subject} em mirava una mica"),
    ("reason.mutual_gaze.exact.full", "{subject} i jo ens miràvem directament"),
    ("reason.mutual_gaze.below.low", "{subject} no em mirava gens"),
    ("reason.mutual_gaze.below.high", "{subject} no em mirava"),
    ("reason.mutual_gaze.below.full", "{subject} i jo no ens miràvem directament"),
    ("reason.mutual_gaze.above.none", "{subject} no mirava lluny de mi"),
    ("reason.mutual_gaze.above.low", "{subject} em mirava"),
    ("reason.mutual_gaze.above.high", "{subject} i jo ens miràvem directament"),
    ("foil.mutual_gaze.single.none", "si {subject} no em mirés gens"),
    ("foil.mutual_gaze.single.low", "si {subject} no em mirés"),
    ("foil.mutual_gaze.single.high", "si {subject} em mirés una mica"),
    ("foil.mutual_gaze.single.full", "si {subject} i jo ens miréssim directament"),
    ("foil.mutual_gaze.at_most.low", "si {subject} no em mirés"),
    ("foil.mutual_gaze.at_most.high", "si {subject} i jo no ens miréssim directament"),
    ("foil.mutual_gaze.at_least.low", "si {subject} em mirés una mica"),
    ("foil.mutual_gaze.at_least.high", "si {subject} em mirés"),
    ("foil.mutual_gaze.within.low.high", "si {subject} em mirés una mica però no directament"),
    // Engagement value
    ("reason.engagement_value.exact.none", "{subject} no estava gens interessat en mi"),
    ("reason.engagement_value.exact.low", "{subject} no estava interessat en mi"),
    ("reason.engagement_value.exact.high", "{subject} estava interessat en mi"),
    ("reason.engagement_value.exact.full", "{subject} estava molt interessat en mi"),
    ("reason.engagement_value.below.low", "{subject} no estava gens interessat en mi"),
    ("reason.engagement_value.below.high", "{subject} no estava interessat en mi"),
    ("reason.engagement_value.below.full", "{subject} no estava molt interessat en mi"),
    ("reason.engagement_value.above.none", "{subject} estava una mica interessat en mi"),
    ("reason.engagement_value.above.low", "{subject} estava interessat en mi"),
    ("reason.engagement_value.above.high", "{subject} estava molt interessat en mi"),
    ("foil.engagement_value.single.none", "si {subject} no estigués gens interessat en mi"),
    ("foil.engagement_value.single.low", "si {subject} no estigués interessat en mi"),
    ("foil.engagement_value.single.high", "si {subject} estigués una mica interessat en mi"),
    ("foil.engagement_value.single.full", "si {subject} estigués molt interessat en mi"),
    ("foil.engagement_value.at_most.low", "si {subject} no estigués interessat en mi"),
    ("foil.engagement_value.at_most.high", "si {subject} no estigués molt interessat en mi"),
    ("foil.engagement_value.at_least.low", "si {subject} estigués una mica interessat en mi"),
    ("foil.engagement_value.at_least.high", "si {subject} estigués interessat en mi"),
    (
        "foil.engagement_value.within.low.high",
        concat!(
            "si {subject} no estigués molt interessat en mi ",
            "i si {subject} no estigués molt desinteressat en mi"
        ),
    ),
    // Pose estimation confidence
    (
        "reason.pose_confidence.exact.none",
        "estava molt insegura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "reason.pose_confidence.exact.low",
        "no estava segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "reason.pose_confidence.exact.high",
        "estava segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "reason.pose_confidence.exact.full",
        "estava molt segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "reason.pose_confidence.below.low",
        "estava molt insegura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "reason.pose_confidence.below.high",
        "no estava segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "reason.pose_confidence.below.full",
        "no estava molt segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "reason.pose_confidence.above.none",
        "estava almenys una mica segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "reason.pose_confidence.above.low",
        "estava segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "reason.pose_confidence.above.high",
        "estava molt segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "foil.pose_confidence.single.none",
        "si estigués molt insegura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "foil.pose_confidence.single.low",
        "si no estigués segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "foil.pose_confidence.single.high",
        "si estigués segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "foil.pose_confidence.single.full",
        "si estigués molt segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "foil.pose_confidence.at_most.low",
        "si no estigués segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "foil.pose_confidence.at_most.high",
        "si no estigués molt segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "foil.pose_confidence.at_least.low",
        "si estigués almenys una mica segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "foil.pose_confidence.at_least.high",
        "si estigués segura de la meva detecció de l'esquelet de {subject}",
    ),
    (
        "foil.pose_confidence.within.low.high",
        concat!(
            "si no estigués ni molt insegura ni molt segura ",
            "de la meva detecció de l'esquelet de {subject}"
        ),
    ),
];

/// Variables the built-in tables phrase.
pub const BUILTIN_VARIABLES: [VariableKind; 3] = [
    VariableKind::MutualGaze,
    VariableKind::EngagementValue,
    VariableKind::PoseConfidence,
];
