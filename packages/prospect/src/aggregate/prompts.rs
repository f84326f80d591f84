//! Prompts for profile aggregation.

/// System prompt for the profile fusion call.
pub const AGGREGATE_SYSTEM_PROMPT: &str = "\
You are a sales-intelligence analyst. You read the text of a company's web \
pages and produce a structured business profile. Be factual: only state \
what the pages support. Leave fields you cannot support as null or empty. \
Respond with ONLY a JSON object.";

/// The JSON shape the model is asked for, also used in repair prompts.
pub const PROFILE_SHAPE: &str = r#"{
  "description": "2-4 sentence plain description of what the company does",
  "industry": "primary industry, lowercase",
  "business_model": "one of: b2b, b2c, saas, marketplace, services, other",
  "stage": "one of: startup, growth, mature, enterprise",
  "tech_sophistication": "one of: low, medium, high",
  "geographic_scope": "one of: local, regional, global",
  "target_market": "who the company sells to",
  "value_proposition": "the core promise to customers",
  "key_services": ["short service/product names"],
  "tech_stack": ["technologies the pages mention or imply"],
  "leadership": [{"name": "Person Name", "title": "CEO"}],
  "location": "headquarters city/region if stated",
  "founding_year": 2004,
  "employee_range": "e.g. 11-50"
}"#;

/// User prompt for single-call aggregation.
pub fn format_aggregate_prompt(company_name: &str, corpus: &str) -> String {
    format!(
        "Build a business profile of \"{company_name}\" from the following \
         page extracts.\n\n\
         Output JSON of exactly this shape (null/empty for unsupported \
         fields):\n{PROFILE_SHAPE}\n\n\
         Page extracts:\n{corpus}"
    )
}

/// User prompt for one map-reduce shard.
pub fn format_shard_prompt(company_name: &str, corpus: &str) -> String {
    format!(
        "Summarize everything these pages reveal about the company \
         \"{company_name}\" that matters for a sales profile: what it does, \
         industry, business model, customers, products and services, \
         technology, leadership names and titles, locations, scale, history. \
         Dense prose, no preamble, at most 400 words.\n\n\
         Page extracts:\n{corpus}"
    )
}

/// User prompt for the reduce step over shard digests.
pub fn format_merge_prompt(company_name: &str, digests: &str) -> String {
    format!(
        "Build a business profile of \"{company_name}\" from these digests \
         of its web pages.\n\n\
         Output JSON of exactly this shape (null/empty for unsupported \
         fields):\n{PROFILE_SHAPE}\n\n\
         Digests:\n{digests}"
    )
}
