//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::sync::Arc;

use prospect::testing::{CountingVectorStore, FailingDocumentStore, MockFetcher, MockLlm};
use prospect::{
    Company, CompanyId, CompanyProfile, EngineConfig, InMemoryVectorStore, Provenance,
    ResearchOrchestrator, SearchRegistry, VectorRecord,
};

pub const EMBEDDING_DIM: usize = 8;

/// A researched-profile response for Visterra.
pub const VISTERRA_PROFILE_JSON: &str = r#"{
    "description": "Visterra discovers and develops precision antibody-based therapeutics.",
    "industry": "Biotechnology",
    "business_model": "b2b",
    "stage": "growth",
    "geographic_scope": "global",
    "target_market": "patients with kidney diseases and other hard-to-treat conditions",
    "key_services": ["antibody discovery", "clinical development"],
    "tech_stack": ["hierarchical antibody design"],
    "leadership": [
        {"name": "Jane Roe", "title": "Chief Executive Officer"},
        {"name": "John Smith", "title": "Chief Scientific Officer"}
    ],
    "location": "Waltham, MA",
    "founding_year": 2007,
    "employee_range": "51-200",
    "value_proposition": "Precision biologics for targets others cannot drug"
}"#;

pub struct TestEngine {
    pub orchestrator: ResearchOrchestrator,
    pub llm: MockLlm,
    pub fetcher: Arc<MockFetcher>,
    pub vector: Arc<CountingVectorStore<InMemoryVectorStore>>,
    pub docs: Arc<FailingDocumentStore>,
}

pub fn engine(config: EngineConfig, llm: MockLlm, fetcher: MockFetcher) -> TestEngine {
    engine_with_registry(config, llm, fetcher, None)
}

pub fn engine_with_registry(
    config: EngineConfig,
    llm: MockLlm,
    fetcher: MockFetcher,
    registry: Option<Arc<SearchRegistry>>,
) -> TestEngine {
    let fetcher = Arc::new(fetcher);
    let vector = Arc::new(CountingVectorStore::new(
        InMemoryVectorStore::with_default_schema(config.embedding_dim),
    ));
    let docs = Arc::new(FailingDocumentStore::new());

    let mut orchestrator = ResearchOrchestrator::new(
        config,
        Arc::new(llm.clone_handle()),
        Arc::clone(&fetcher) as _,
        Arc::clone(&vector) as _,
        Arc::clone(&docs) as _,
    );
    if let Some(registry) = registry {
        orchestrator = orchestrator.with_search_registry(registry);
    }

    TestEngine {
        orchestrator,
        llm,
        fetcher,
        vector,
        docs,
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        embedding_dim: EMBEDDING_DIM,
        llm_backoff_ms: 20,
        ..EngineConfig::default()
    }
}

/// Fixtures for the Visterra happy path: robots + sitemap + six content
/// pages.
pub fn visterra_fetcher() -> MockFetcher {
    MockFetcher::new()
        .with_body(
            "https://visterrainc.com/robots.txt",
            "User-agent: *\nDisallow: /careers/apply\nSitemap: https://visterrainc.com/sitemap.xml\n",
        )
        .with_body(
            "https://visterrainc.com/sitemap.xml",
            "<urlset>\
             <url><loc>https://visterrainc.com/about</loc></url>\
             <url><loc>https://visterrainc.com/team</loc></url>\
             <url><loc>https://visterrainc.com/pipeline</loc></url>\
             </urlset>",
        )
        .with_html(
            "https://visterrainc.com/",
            r##"<html><head><title>Visterra Inc</title></head><body>
            <h1>Precision antibody therapeutics</h1>
            <p>Visterra applies its hierarchical design platform to create biologics.</p>
            <a href="/about">About</a>
            <a href="/team">Our Team</a>
            <a href="/pipeline">Pipeline</a>
            <a href="/contact">Contact</a>
            </body></html>"##,
        )
        .with_html(
            "https://visterrainc.com/about",
            "<h1>About Visterra</h1><p>Biotechnology company in Waltham developing novel antibody therapeutics for kidney disease.</p>",
        )
        .with_html(
            "https://visterrainc.com/team",
            "<h1>Leadership</h1><p>Jane Roe, Chief Executive Officer. John Smith, Chief Scientific Officer.</p>",
        )
        .with_html(
            "https://visterrainc.com/pipeline",
            "<h1>Pipeline</h1><p>Clinical programs in IgA nephropathy and other kidney diseases.</p>",
        )
        .with_html(
            "https://visterrainc.com/contact",
            "<h1>Contact</h1><p>Waltham, Massachusetts.</p>",
        )
}

/// Hand-built stored company for similarity tests.
pub fn stored_company(
    name: &str,
    website: &str,
    profile: CompanyProfile,
    embedding: Vec<f32>,
) -> Company {
    Company {
        id: CompanyId::new(),
        name: name.to_string(),
        website: website.to_string(),
        profile,
        embedding_text: format!("Company: {name}."),
        embedding,
        low_quality: false,
        provenance: Provenance {
            crawled_at: Some(chrono::Utc::now()),
            ..Default::default()
        },
    }
}

/// Minimal vector record for a hand-seeded company.
pub fn record_for(company: &Company) -> VectorRecord {
    let mut metadata = indexmap::IndexMap::new();
    metadata.insert(
        "name".to_string(),
        prospect::MetadataValue::from(company.name.clone()),
    );
    VectorRecord {
        id: company.id,
        vector: company.embedding.clone(),
        metadata,
    }
}
