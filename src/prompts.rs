//! Prompts for LLM-based page-to-zone classification.
//!
//! Every prompt lives here so a wording change never touches the retry or
//! parsing logic in [`crate::pipeline::classify`], and so tests can inspect
//! the prompts without a provider.
//!
//! Callers can override the system prompt via
//! [`crate::config::PipelineConfig::system_prompt`]; the constant below is
//! used only when no override is provided.

/// Default system prompt for splitting a regulation into zones.
///
/// The answer schema it asks for is exactly the one
/// [`crate::pipeline::classify::parse_groups`] accepts; anything else is
/// rejected as malformed.
pub const DEFAULT_ZONE_PROMPT: &str = r#"You are an expert in French urban-planning regulations (PLU, PLUi, RNU). You receive every page of one regulation document, each introduced by "Page N:" where N is the page index.

Your task is to tell which pages hold the rules of which zone.

Follow these rules precisely:

1. ZONES
   - A zone is the finest regulation unit (e.g. "UA", "UB1", "AUc", "N", "A")
   - A zoning is the group a zone belongs to (e.g. "zones_urbaines", "zones_a_urbaniser", "zones_agricoles", "zones_naturelles")
   - Use the zone and zoning names as written in the document

2. PAGES
   - List, for each zone, every page index holding rules that apply to it
   - Keep pages in reading order
   - A page may belong to several zones when it carries rules for several
   - Pages of general provisions, tables of contents and annexes belong to no zone unless their rules target a zone explicitly

3. OUTPUT FORMAT
   - Output ONLY a JSON array, one object per zone:
     [{"zoning": "<zoning>", "zone": "<zone>", "pages": [<page index>, ...]}]
   - Use the page indices given after "Page", never positions
   - Do NOT add commentary or explanations
   - Do NOT wrap the JSON in ```json fences"#;

/// One classifier input part: a page's index followed by its markdown.
pub fn page_part(index: u32, markdown: &str) -> String {
    format!("Page {}: {}", index, markdown)
}
