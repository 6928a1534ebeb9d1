//! Static-table normalizers: technologies, locations and the enum-like fields.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tjm_core::{ContractType, Location, RemotePolicy, SeniorityLevel};

const TECHNOLOGIES_YAML: &str = include_str!("../../../rules/technologies.yaml");
const LOCATIONS_YAML: &str = include_str!("../../../rules/locations.yaml");

static PAREN_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)\s*\(\s*([^()]+?)\s*\)$").expect("location pattern compiles")
});
static DEPARTMENT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d{2,3}|2[AaBb])$").expect("department pattern compiles"));

/// Trim and collapse inner whitespace runs to a single space.
pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Capitalize each word, including each part of hyphenated words.
pub fn title_case(raw: &str) -> String {
    collapse_whitespace(raw)
        .split(' ')
        .map(|word| {
            word.split('-')
                .map(capitalize)
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn lookup_key(raw: &str) -> String {
    collapse_whitespace(raw).to_lowercase()
}

#[derive(Debug, Clone, Deserialize)]
struct TechnologyCatalogFile {
    #[allow(dead_code)]
    version: u32,
    technologies: Vec<TechnologyEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnologyEntry {
    pub canonical: String,
    pub category: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_scan_text")]
    pub scan_text: bool,
}

fn default_scan_text() -> bool {
    true
}

/// Maps raw technology strings to canonical names.
#[derive(Debug, Clone)]
pub struct TechnologyNormalizer {
    entries: Vec<TechnologyEntry>,
    lookup: HashMap<String, usize>,
    scanners: Vec<(Regex, usize)>,
}

impl TechnologyNormalizer {
    /// Catalog shipped in `rules/technologies.yaml`.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(TECHNOLOGIES_YAML).context("parsing rules/technologies.yaml")
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: TechnologyCatalogFile = serde_yaml::from_str(yaml)?;
        Self::from_entries(file.technologies)
    }

    pub fn from_entries(entries: Vec<TechnologyEntry>) -> Result<Self> {
        let mut lookup = HashMap::new();
        let mut scanners = Vec::new();

        for (idx, entry) in entries.iter().enumerate() {
            let keys = std::iter::once(&entry.canonical)
                .chain(entry.aliases.iter())
                .map(|k| lookup_key(k))
                .filter(|k| !k.is_empty())
                .collect::<BTreeSet<_>>();
            for key in keys {
                // First entry claiming a key keeps it.
                lookup.entry(key.clone()).or_insert(idx);
                if entry.scan_text {
                    let pattern = format!(
                        r"(?i)(?:^|[^\p{{L}}\p{{N}}_]){}(?:$|[^\p{{L}}\p{{N}}_+#])",
                        regex::escape(&key)
                    );
                    let regex = Regex::new(&pattern)
                        .with_context(|| format!("compiling scan pattern for `{key}`"))?;
                    scanners.push((regex, idx));
                }
            }
        }

        Ok(Self {
            entries,
            lookup,
            scanners,
        })
    }

    pub fn catalog(&self) -> &[TechnologyEntry] {
        &self.entries
    }

    /// Canonical name for a known alias; `None` for unknown input.
    pub fn canonical(&self, raw: &str) -> Option<&str> {
        self.lookup
            .get(&lookup_key(raw))
            .map(|&idx| self.entries[idx].canonical.as_str())
    }

    pub fn category_of(&self, canonical: &str) -> Option<&str> {
        self.lookup
            .get(&lookup_key(canonical))
            .map(|&idx| self.entries[idx].category.as_str())
    }

    /// Canonical name, or the cleaned input when the alias is unknown.
    pub fn normalize_one(&self, raw: &str) -> Option<String> {
        let cleaned = collapse_whitespace(raw);
        if cleaned.is_empty() {
            return None;
        }
        Some(
            self.canonical(&cleaned)
                .map(ToString::to_string)
                .unwrap_or(cleaned),
        )
    }

    /// Normalize a list: canonical names, exact duplicates removed, sorted.
    pub fn normalize<I, S>(&self, raw: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .filter_map(|item| self.normalize_one(item.as_ref()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Known technologies mentioned in free text, on word boundaries.
    pub fn scan_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.scanners
            .iter()
            .filter(|(regex, _)| regex.is_match(text))
            .map(|(_, idx)| self.entries[*idx].canonical.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LocationRulesFile {
    #[allow(dead_code)]
    version: u32,
    country: String,
    #[serde(default)]
    remote_markers: Vec<String>,
    #[serde(default)]
    regions: Vec<RegionEntry>,
    #[serde(default)]
    cities: Vec<CityEntry>,
    #[serde(default)]
    departments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RegionEntry {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CityEntry {
    name: String,
    region: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLocation {
    Empty,
    /// The text only says the job is remote.
    RemoteOnly,
    Place(Location),
}

#[derive(Debug, Clone)]
pub struct LocationParser {
    country: String,
    remote_markers: HashSet<String>,
    regions: HashMap<String, String>,
    cities: HashMap<String, (String, Option<String>)>,
    departments: HashMap<String, String>,
}

impl LocationParser {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(LOCATIONS_YAML).context("parsing rules/locations.yaml")
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: LocationRulesFile = serde_yaml::from_str(yaml)?;

        let mut regions = HashMap::new();
        for region in &file.regions {
            for key in std::iter::once(&region.name).chain(region.aliases.iter()) {
                regions.insert(lookup_key(key), region.name.clone());
            }
        }

        let mut cities = HashMap::new();
        for city in &file.cities {
            for key in std::iter::once(&city.name).chain(city.aliases.iter()) {
                cities.insert(lookup_key(key), (city.name.clone(), city.region.clone()));
            }
        }

        Ok(Self {
            country: file.country,
            remote_markers: file.remote_markers.iter().map(|m| lookup_key(m)).collect(),
            regions,
            cities,
            departments: file
                .departments
                .into_iter()
                .map(|(code, region)| (code.to_uppercase(), region))
                .collect(),
        })
    }

    pub fn default_country(&self) -> &str {
        &self.country
    }

    pub fn is_remote_marker(&self, raw: &str) -> bool {
        self.remote_markers.contains(&lookup_key(raw))
    }

    pub fn parse(&self, raw: &str) -> ParsedLocation {
        let text = collapse_whitespace(raw);
        if text.is_empty() {
            return ParsedLocation::Empty;
        }
        if self.is_remote_marker(&text) {
            return ParsedLocation::RemoteOnly;
        }

        let (city_part, region_part, department) = split_location(&text);
        let country = self.country.clone();
        let region_part = region_part.filter(|part| !part.eq_ignore_ascii_case(&self.country));

        // A bare region or country name is not a city.
        let mut region = region_part.as_deref().map(|r| self.normalize_region(r));
        if region_part.is_none() {
            if city_part.eq_ignore_ascii_case(&self.country) {
                return ParsedLocation::Place(Location {
                    city: None,
                    region: None,
                    country,
                    raw: text,
                });
            }
            if let Some(canonical) = self.regions.get(&lookup_key(&city_part)) {
                return ParsedLocation::Place(Location {
                    city: None,
                    region: Some(canonical.clone()),
                    country,
                    raw: text,
                });
            }
        }

        let (city_name, inferred_region) = self.normalize_city(&city_part);
        let city = (!city_name.is_empty()).then_some(city_name);
        if region.is_none() {
            region = inferred_region.or_else(|| {
                department.and_then(|code| self.departments.get(&code.to_uppercase()).cloned())
            });
        }

        ParsedLocation::Place(Location {
            city,
            region,
            country,
            raw: text,
        })
    }

    fn normalize_region(&self, raw: &str) -> String {
        self.regions
            .get(&lookup_key(raw))
            .cloned()
            .unwrap_or_else(|| title_case(raw))
    }

    fn normalize_city(&self, raw: &str) -> (String, Option<String>) {
        match self.cities.get(&lookup_key(raw)) {
            Some((name, region)) => (name.clone(), region.clone()),
            None => (title_case(raw), None),
        }
    }
}

/// Split into (city, region, department code).
fn split_location(text: &str) -> (String, Option<String>, Option<String>) {
    if let Some(caps) = PAREN_FORM.captures(text) {
        let city = caps[1].trim().to_string();
        let inner = caps[2].trim();
        if DEPARTMENT_CODE.is_match(inner) {
            return (city, None, Some(inner.to_string()));
        }
        return (city, Some(inner.to_string()), None);
    }

    if text.contains(',') {
        let mut parts = text.split(',').map(str::trim).filter(|p| !p.is_empty());
        let city = parts.next().unwrap_or_default().to_string();
        return (city, parts.next().map(ToString::to_string), None);
    }

    for dash in [" - ", " – ", " — "] {
        if let Some((city, region)) = text.split_once(dash) {
            let region = region.trim();
            return (
                city.trim().to_string(),
                (!region.is_empty()).then(|| region.to_string()),
                None,
            );
        }
    }

    (text.to_string(), None, None)
}

fn alias_key(raw: &str) -> String {
    lookup_key(raw).replace(['_', '-'], " ")
}

/// Contract type from scraped text; unknown values mean freelance.
pub fn parse_contract_type(raw: Option<&str>) -> ContractType {
    let Some(raw) = raw else {
        return ContractType::default();
    };
    match alias_key(raw).as_str() {
        "cdi" | "permanent" => ContractType::Cdi,
        "cdd" | "fixed term" => ContractType::Cdd,
        "stage" | "internship" | "stagiaire" => ContractType::Stage,
        "apprentissage" | "alternance" | "apprenticeship" => ContractType::Apprentissage,
        _ => ContractType::Freelance,
    }
}

pub fn parse_remote_policy(raw: &str) -> Option<RemotePolicy> {
    match alias_key(raw).as_str() {
        "on site" | "onsite" | "sur site" | "présentiel" | "presentiel" => Some(RemotePolicy::OnSite),
        "remote" | "full remote" | "100% remote" | "télétravail" | "teletravail"
        | "télétravail complet" => Some(RemotePolicy::Remote),
        "hybrid" | "hybride" | "mixte" | "partial remote" | "télétravail partiel" => {
            Some(RemotePolicy::Hybrid)
        }
        "negotiable" | "négociable" | "negociable" | "à négocier" => Some(RemotePolicy::Negotiable),
        _ => None,
    }
}

pub fn parse_seniority(raw: &str) -> Option<SeniorityLevel> {
    match alias_key(raw).as_str() {
        "junior" | "débutant" | "debutant" => Some(SeniorityLevel::Junior),
        "middle" | "mid" | "mid level" | "intermédiaire" | "intermediaire" | "confirmé"
        | "confirme" => Some(SeniorityLevel::Middle),
        "senior" | "sénior" | "expérimenté" | "experimente" => Some(SeniorityLevel::Senior),
        "lead" | "tech lead" | "lead dev" => Some(SeniorityLevel::Lead),
        "expert" | "architect" | "architecte" | "principal" => Some(SeniorityLevel::Expert),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn technologies() -> TechnologyNormalizer {
        TechnologyNormalizer::builtin().expect("builtin catalog")
    }

    fn locations() -> LocationParser {
        LocationParser::builtin().expect("builtin locations")
    }

    fn place(parsed: ParsedLocation) -> Location {
        match parsed {
            ParsedLocation::Place(loc) => loc,
            other => panic!("expected a place, got {other:?}"),
        }
    }

    #[test]
    fn react_spellings_share_one_canonical_name() {
        let techs = technologies();
        let canon = ["reactjs", "REACT", "react", " React "]
            .into_iter()
            .map(|raw| techs.normalize_one(raw))
            .collect::<Vec<_>>();
        assert!(canon.iter().all(|c| c.as_deref() == Some("React")), "{canon:?}");
    }

    #[test]
    fn unknown_technologies_pass_through_cleaned() {
        let techs = technologies();
        assert_eq!(techs.normalize_one("  SAP   FI/CO "), Some("SAP FI/CO".to_string()));
        assert_eq!(techs.normalize_one("   "), None);
    }

    #[test]
    fn lists_are_deduplicated_and_sorted() {
        let techs = technologies();
        let out = techs.normalize(["postgres", "k8s", "PostgreSQL", "nodejs", "Kubernetes"]);
        assert_eq!(out, vec!["Kubernetes", "Node.js", "PostgreSQL"]);
    }

    #[test]
    fn categories_follow_canonical_names() {
        let techs = technologies();
        assert_eq!(techs.category_of("PostgreSQL"), Some("database"));
        assert_eq!(techs.category_of("gcp"), Some("cloud"));
        assert_eq!(techs.category_of("COBOL"), None);
    }

    #[test]
    fn text_scan_respects_word_boundaries_and_ambiguous_aliases() {
        let techs = technologies();
        let found = techs.scan_text("Développeur JavaScript/React, un peu de Go et de Spring Boot");
        assert!(found.contains(&"JavaScript".to_string()));
        assert!(found.contains(&"React".to_string()));
        assert!(found.contains(&"Spring Boot".to_string()));
        assert!(!found.contains(&"Java".to_string()));
        assert!(!found.contains(&"Go".to_string()));

        assert_eq!(techs.scan_text("Expert C# et .NET"), vec![".NET", "C#"]);
    }

    #[test]
    fn comma_separated_locations_split_into_city_and_region() {
        let loc = place(locations().parse("Paris, idf"));
        assert_eq!(loc.city.as_deref(), Some("Paris"));
        assert_eq!(loc.region.as_deref(), Some("Île-de-France"));
        assert_eq!(loc.country, "France");
    }

    #[test]
    fn department_codes_infer_the_region() {
        let parser = locations();
        let loc = place(parser.parse("Lyon (69)"));
        assert_eq!(loc.city.as_deref(), Some("Lyon"));
        assert_eq!(loc.region.as_deref(), Some("Auvergne-Rhône-Alpes"));

        let loc = place(parser.parse("Massy (91)"));
        assert_eq!(loc.city.as_deref(), Some("Massy"));
        assert_eq!(loc.region.as_deref(), Some("Île-de-France"));
    }

    #[test]
    fn spaced_dash_splits_but_hyphenated_cities_stay_whole() {
        let parser = locations();
        let loc = place(parser.parse("Nantes - Pays de la Loire"));
        assert_eq!(loc.city.as_deref(), Some("Nantes"));
        assert_eq!(loc.region.as_deref(), Some("Pays de la Loire"));

        let loc = place(parser.parse("clermont-ferrand"));
        assert_eq!(loc.city.as_deref(), Some("Clermont-Ferrand"));
        assert_eq!(loc.region.as_deref(), Some("Auvergne-Rhône-Alpes"));

        let loc = place(parser.parse("saint-étienne"));
        assert_eq!(loc.city.as_deref(), Some("Saint-Étienne"));
        assert_eq!(loc.region, None);
    }

    #[test]
    fn country_and_region_only_inputs() {
        let parser = locations();
        let loc = place(parser.parse("Bordeaux, France"));
        assert_eq!(loc.city.as_deref(), Some("Bordeaux"));
        assert_eq!(loc.region.as_deref(), Some("Nouvelle-Aquitaine"));

        let loc = place(parser.parse("PACA"));
        assert_eq!(loc.city, None);
        assert_eq!(loc.region.as_deref(), Some("Provence-Alpes-Côte d'Azur"));
    }

    #[test]
    fn remote_markers_are_not_places() {
        let parser = locations();
        assert_eq!(parser.parse("Remote"), ParsedLocation::RemoteOnly);
        assert_eq!(parser.parse("full   remote"), ParsedLocation::RemoteOnly);
        assert_eq!(parser.parse("Télétravail"), ParsedLocation::RemoteOnly);
        assert_eq!(parser.parse("  "), ParsedLocation::Empty);
    }

    #[test]
    fn enum_aliases_cover_french_spellings() {
        assert_eq!(parse_remote_policy("Hybride"), Some(RemotePolicy::Hybrid));
        assert_eq!(parse_remote_policy("sur site"), Some(RemotePolicy::OnSite));
        assert_eq!(parse_remote_policy("on-site"), Some(RemotePolicy::OnSite));
        assert_eq!(parse_remote_policy("100% remote"), Some(RemotePolicy::Remote));
        assert_eq!(parse_remote_policy("lundi"), None);

        assert_eq!(parse_seniority("Confirmé"), Some(SeniorityLevel::Middle));
        assert_eq!(parse_seniority("architecte"), Some(SeniorityLevel::Expert));
        assert_eq!(parse_seniority("stagiaire"), None);

        assert_eq!(parse_contract_type(Some("CDI")), ContractType::Cdi);
        assert_eq!(parse_contract_type(Some("alternance")), ContractType::Apprentissage);
        assert_eq!(parse_contract_type(Some("mission")), ContractType::Freelance);
        assert_eq!(parse_contract_type(None), ContractType::Freelance);
    }

    #[test]
    fn title_case_handles_hyphens_and_accents() {
        assert_eq!(title_case("aix-EN-provence"), "Aix-En-Provence");
        assert_eq!(title_case("  île   de france "), "Île De France");
    }
}
