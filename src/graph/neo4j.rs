//! Neo4j graph source over the HTTP transactional endpoint.
//!
//! Every [`GraphQuery`] renders to one or more Cypher statements with named
//! parameters. Statements are committed in a single request to
//! `{uri}/db/{database}/tx/commit`, and each returned row is zipped with its
//! statement's column list.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::GraphError;

use super::explore::{Affinity, PathCategory, RELATED_DISEASE_NAMES, SHARED_NAMES, affinities};
use super::metapath::{Hop, Step};
use super::{GraphQuery, GraphResult, GraphSource, NodeKind, Row};

/// Return columns of a matched `path`.
const PATH_COLUMNS: &str = "[n IN nodes(path) | {id: n.id, name: n.name, kind: labels(n)[0]}] AS nodes, \
                            [r IN relationships(path) | type(r)] AS relations";

/// Node labels the core reads; other labels in the store are ignored.
const LOADED_KINDS: [NodeKind; 6] = [
    NodeKind::Compound,
    NodeKind::Disease,
    NodeKind::Gene,
    NodeKind::Anatomy,
    NodeKind::Pathway,
    NodeKind::PharmacologicClass,
];

/// Connection settings for a Neo4j server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neo4jConfig {
    /// Base HTTP URI, e.g. `http://localhost:7474`.
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_database() -> String {
    "neo4j".into()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Neo4jConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: default_database(),
            user: None,
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// A single Cypher statement with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CypherStatement {
    pub statement: String,
    pub parameters: Map<String, Value>,
}

impl CypherStatement {
    fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Map::new(),
        }
    }

    fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

fn kind_filter(var: &str) -> String {
    LOADED_KINDS
        .iter()
        .map(|k| format!("{var}:{}", k.label()))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn relationship_pattern(step: &Step) -> String {
    let types = if step.relations.is_empty() {
        String::new()
    } else {
        format!(":{}", step.relations.join("|"))
    };
    match step.hop {
        Hop::Out => format!("-[{types}]->"),
        Hop::In => format!("<-[{types}]-"),
        Hop::Either => format!("-[{types}]-"),
    }
}

/// Render a metapath as `MATCH path = (n0:Compound {id: $drug_id})-[...]->(n1:Gene)...`.
fn metapath_match(steps: &[Step]) -> String {
    let mut pattern = String::from("(n0:Compound {id: $drug_id})");
    for (i, step) in steps.iter().enumerate() {
        let anchor = if step.anchored { " {id: $disease_id}" } else { "" };
        pattern.push_str(&relationship_pattern(step));
        pattern.push_str(&format!("(n{}:{}{anchor})", i + 1, step.kind.label()));
    }
    format!("MATCH path = {pattern}")
}

/// Render one affinity of `kind` as a statement over `$id` and `$limit`.
fn affinity_statement(kind: NodeKind, affinity: &Affinity) -> String {
    let label = kind.label();
    match affinity.hops {
        [direct] => format!(
            "MATCH (n:{label} {{id: $id}}){}(related:{}) WHERE related <> n \
             RETURN DISTINCT related.id AS id, related.name AS name, '{}' AS relation, \
             1 AS score, [] AS shared LIMIT $limit",
            relationship_pattern(direct),
            direct.kind.label(),
            affinity.relation
        ),
        [via, back] => format!(
            "MATCH (n:{label} {{id: $id}}){}(via:{}){}(related:{}) WHERE related <> n \
             WITH related, collect(DISTINCT coalesce(via.name, via.id)) AS shared, \
             count(DISTINCT via) AS score ORDER BY score DESC \
             RETURN related.id AS id, related.name AS name, '{}' AS relation, score, \
             shared[0..{SHARED_NAMES}] AS shared LIMIT $limit",
            relationship_pattern(via),
            via.kind.label(),
            relationship_pattern(back),
            back.kind.label(),
            affinity.relation
        ),
        _ => String::new(),
    }
}

impl GraphQuery<'_> {
    /// Render as Cypher statements for a string-based graph store.
    pub fn cypher(&self) -> Vec<CypherStatement> {
        match self {
            GraphQuery::Nodes => vec![CypherStatement::new(format!(
                "MATCH (n) WHERE {} RETURN n.id AS id, n.name AS name, labels(n)[0] AS kind",
                kind_filter("n")
            ))],
            GraphQuery::Edges => vec![CypherStatement::new(format!(
                "MATCH (a)-[r]->(b) WHERE ({}) AND ({}) \
                 RETURN a.id AS source, b.id AS target, type(r) AS relation",
                kind_filter("a"),
                kind_filter("b")
            ))],
            GraphQuery::TreatmentPairs => vec![CypherStatement::new(
                "MATCH (c:Compound)-[:TREATS|PALLIATES]->(d:Disease) \
                 RETURN c.id AS compound_id, d.id AS disease_id",
            )],
            GraphQuery::Candidates { disease_id, limit } => vec![
                CypherStatement::new(
                    "MATCH (c:Compound) WHERE NOT (c)-[:TREATS]->(:Disease {id: $disease_id}) \
                     RETURN c.id AS id, c.name AS name LIMIT $limit",
                )
                .param("disease_id", *disease_id)
                .param("limit", *limit as u64),
            ],
            GraphQuery::Metapath {
                steps,
                compound_id,
                disease_id,
            } => {
                let mut stmt = CypherStatement::new(format!(
                    "{} RETURN {PATH_COLUMNS} LIMIT 1",
                    metapath_match(steps)
                ))
                .param("drug_id", *compound_id);
                if steps.iter().any(|s| s.anchored) {
                    stmt = stmt.param("disease_id", *disease_id);
                }
                vec![stmt]
            }
            GraphQuery::Stats => vec![
                CypherStatement::new(
                    "MATCH (n) WITH labels(n)[0] AS kind WHERE kind IN $kinds \
                     RETURN kind, count(*) AS count",
                )
                .param(
                    "kinds",
                    NodeKind::ALL.iter().map(|k| k.label()).collect::<Vec<_>>(),
                ),
                CypherStatement::new("MATCH ()-[r]->() RETURN count(r) AS relationships"),
            ],
            GraphQuery::Listing { kind, limit } => vec![
                CypherStatement::new(format!(
                    "MATCH (n:{}) RETURN n.id AS id, n.name AS name ORDER BY n.name LIMIT $limit",
                    kind.label()
                ))
                .param("limit", *limit as u64),
            ],
            GraphQuery::Node { id } => vec![
                CypherStatement::new(
                    "MATCH (n {id: $id}) RETURN n.id AS id, n.name AS name, labels(n)[0] AS kind LIMIT 1",
                )
                .param("id", *id),
            ],
            GraphQuery::DiseaseSummary { disease_id } => vec![
                CypherStatement::new(
                    "MATCH (d:Disease {id: $disease_id}) \
                     OPTIONAL MATCH (d)-[:ASSOCIATES]-(g:Gene) \
                     OPTIONAL MATCH (c:Compound)-[:TREATS]->(d) \
                     OPTIONAL MATCH (d)-[:LOCALIZES]->(a:Anatomy) \
                     RETURN d.id AS id, d.name AS name, count(DISTINCT g) AS gene_count, \
                     count(DISTINCT c) AS treatment_count, collect(DISTINCT a.name) AS anatomy",
                )
                .param("disease_id", *disease_id),
            ],
            GraphQuery::SimilarDiseases { disease_id, limit } => vec![
                CypherStatement::new(
                    "MATCH (d:Disease {id: $disease_id})-[:RESEMBLES]-(similar:Disease) \
                     WHERE similar <> d \
                     WITH DISTINCT d, similar \
                     OPTIONAL MATCH (d)-[:ASSOCIATES]-(g:Gene)-[:ASSOCIATES]-(similar) \
                     WITH similar, count(DISTINCT g) AS shared_genes \
                     OPTIONAL MATCH (c:Compound)-[:TREATS]->(similar) \
                     RETURN similar.id AS id, similar.name AS name, shared_genes, \
                     count(DISTINCT c) AS treatment_count \
                     ORDER BY shared_genes DESC LIMIT $limit",
                )
                .param("disease_id", *disease_id)
                .param("limit", *limit as u64),
            ],
            GraphQuery::SharedGenes { disease_id, limit } => vec![
                CypherStatement::new(format!(
                    "MATCH (d:Disease {{id: $disease_id}})-[:ASSOCIATES]-(g:Gene)-[:ASSOCIATES]-(other:Disease) \
                     WHERE other <> d \
                     RETURN g.id AS id, g.name AS name, \
                     collect(DISTINCT coalesce(other.name, other.id))[0..{RELATED_DISEASE_NAMES}] AS related_diseases \
                     LIMIT $limit"
                ))
                .param("disease_id", *disease_id)
                .param("limit", *limit as u64),
            ],
            GraphQuery::Related { kind, id, limit } => affinities(*kind)
                .iter()
                .map(|affinity| {
                    CypherStatement::new(affinity_statement(*kind, affinity))
                        .param("id", *id)
                        .param("limit", *limit as u64)
                })
                .collect(),
            GraphQuery::ConnectingPaths {
                compound_id,
                disease_id,
                limit,
            } => PathCategory::ALL
                .iter()
                .map(|category| {
                    CypherStatement::new(format!(
                        "{} RETURN '{}' AS category, {PATH_COLUMNS} LIMIT $limit",
                        metapath_match(category.steps()),
                        category.label()
                    ))
                    .param("drug_id", *compound_id)
                    .param("disease_id", *disease_id)
                    .param("limit", *limit as u64)
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    columns: Vec<String>,
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// Graph source backed by a Neo4j server.
pub struct Neo4jSource {
    config: Neo4jConfig,
    http: ureq::Agent,
}

impl Neo4jSource {
    pub fn new(config: Neo4jConfig) -> Self {
        let http = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, http }
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.uri.trim_end_matches('/'),
            self.config.database
        )
    }

    fn authorization(&self) -> Option<String> {
        let user = self.config.user.as_deref()?;
        let password = self.config.password.as_deref().unwrap_or_default();
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        Some(format!("Basic {token}"))
    }

    /// Check that the server answers a trivial statement.
    pub fn verify_connectivity(&self) -> GraphResult<()> {
        self.run(&[CypherStatement::new("RETURN 1 AS ok")]).map(|_| ())
    }

    fn run(&self, statements: &[CypherStatement]) -> GraphResult<Vec<Row>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        let mut request = self
            .http
            .post(&self.commit_url())
            .set("Accept", "application/json");
        if let Some(auth) = self.authorization() {
            request = request.set("Authorization", &auth);
        }
        let resp = request
            .send_json(json!({ "statements": statements }))
            .map_err(|e| GraphError::Unavailable {
                message: e.to_string(),
            })?;
        let body: TxResponse = resp.into_json().map_err(|e| GraphError::Query {
            message: format!("failed to parse JSON: {e}"),
        })?;

        if let Some(err) = body.errors.first() {
            return Err(GraphError::Query {
                message: format!("{}: {}", err.code, err.message),
            });
        }

        Ok(body
            .results
            .into_iter()
            .flat_map(|result| {
                let columns = result.columns;
                result.data.into_iter().map(move |data| {
                    columns.iter().cloned().zip(data.row).collect::<Row>()
                })
            })
            .collect())
    }
}

impl GraphSource for Neo4jSource {
    fn query(&self, query: &GraphQuery<'_>) -> GraphResult<Vec<Row>> {
        tracing::debug!(query = query.name(), uri = %self.config.uri, "neo4j query");
        self.run(&query.cypher())
    }

    fn name(&self) -> &str {
        "neo4j"
    }
}

impl std::fmt::Debug for Neo4jSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jSource")
            .field("uri", &self.config.uri)
            .field("database", &self.config.database)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metapath_renders_anchor_and_direction() {
        const STEPS: &[Step] = &[
            Step::out(&["UPREGULATES", "DOWNREGULATES"], NodeKind::Gene),
            Step::out(&["ASSOCIATES"], NodeKind::Disease).to_target(),
        ];
        let stmts = GraphQuery::Metapath {
            steps: STEPS,
            compound_id: "DB01",
            disease_id: "DOID:1",
        }
        .cypher();
        assert_eq!(stmts.len(), 1);
        let text = &stmts[0].statement;
        assert!(text.starts_with(
            "MATCH path = (n0:Compound {id: $drug_id})-[:UPREGULATES|DOWNREGULATES]->(n1:Gene)\
             -[:ASSOCIATES]->(n2:Disease {id: $disease_id})"
        ));
        assert!(text.ends_with("LIMIT 1"));
        assert_eq!(stmts[0].parameters["drug_id"], "DB01");
        assert_eq!(stmts[0].parameters["disease_id"], "DOID:1");
    }

    #[test]
    fn unanchored_metapath_omits_disease_param() {
        const STEPS: &[Step] = &[Step::either(&[], NodeKind::Gene)];
        let stmts = GraphQuery::Metapath {
            steps: STEPS,
            compound_id: "DB01",
            disease_id: "DOID:1",
        }
        .cypher();
        assert!(stmts[0].statement.contains("-[]-(n1:Gene)"));
        assert!(!stmts[0].parameters.contains_key("disease_id"));
    }

    #[test]
    fn candidates_bind_limit() {
        let stmts = GraphQuery::Candidates {
            disease_id: "DOID:1",
            limit: 50,
        }
        .cypher();
        assert_eq!(stmts[0].parameters["limit"], 50);
        assert!(stmts[0].statement.contains("NOT (c)-[:TREATS]->"));
    }

    #[test]
    fn stats_issue_two_statements() {
        assert_eq!(GraphQuery::Stats.cypher().len(), 2);
    }

    #[test]
    fn listing_orders_by_name() {
        let stmts = GraphQuery::Listing {
            kind: NodeKind::Disease,
            limit: 100,
        }
        .cypher();
        assert!(stmts[0].statement.starts_with("MATCH (n:Disease)"));
        assert!(stmts[0].statement.contains("ORDER BY n.name"));
        assert_eq!(stmts[0].parameters["limit"], 100);
    }

    #[test]
    fn related_renders_one_statement_per_affinity() {
        let stmts = GraphQuery::Related {
            kind: NodeKind::Compound,
            id: "DB01",
            limit: 20,
        }
        .cypher();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].statement.contains("-[:RESEMBLES]-(related:Compound)"));
        assert!(stmts[0].statement.contains("'resembles' AS relation"));
        assert!(
            stmts[1]
                .statement
                .contains("-[:BINDS|TARGETS]-(via:Gene)-[:BINDS|TARGETS]-(related:Compound)")
        );
        assert!(stmts[1].statement.contains("shared[0..5] AS shared"));
        assert!(
            stmts[2]
                .statement
                .contains("-[:TREATS]->(via:Disease)<-[:TREATS]-(related:Compound)")
        );
        for stmt in &stmts {
            assert_eq!(stmt.parameters["id"], "DB01");
            assert_eq!(stmt.parameters["limit"], 20);
        }

        let none = GraphQuery::Related {
            kind: NodeKind::Gene,
            id: "G1",
            limit: 20,
        }
        .cypher();
        assert!(none.is_empty());
    }

    #[test]
    fn connecting_paths_tag_each_category() {
        let stmts = GraphQuery::ConnectingPaths {
            compound_id: "DB01",
            disease_id: "DOID:1",
            limit: 5,
        }
        .cypher();
        assert_eq!(stmts.len(), PathCategory::ALL.len());
        for (stmt, category) in stmts.iter().zip(PathCategory::ALL) {
            assert!(stmt.statement.contains(&format!("'{}' AS category", category.label())));
            assert!(stmt.statement.contains("{id: $disease_id}"));
            assert_eq!(stmt.parameters["drug_id"], "DB01");
            assert_eq!(stmt.parameters["limit"], 5);
        }
        assert!(stmts[0].statement.contains("-[:TREATS|PALLIATES]->(n1:Disease {id: $disease_id})"));
    }

    #[test]
    fn disease_summary_and_shared_genes_bind_disease() {
        for query in [
            GraphQuery::DiseaseSummary {
                disease_id: "DOID:1",
            },
            GraphQuery::SimilarDiseases {
                disease_id: "DOID:1",
                limit: 10,
            },
            GraphQuery::SharedGenes {
                disease_id: "DOID:1",
                limit: 10,
            },
        ] {
            let stmts = query.cypher();
            assert_eq!(stmts.len(), 1, "{}", query.name());
            assert!(stmts[0].statement.starts_with("MATCH (d:Disease {id: $disease_id})"));
            assert_eq!(stmts[0].parameters["disease_id"], "DOID:1");
        }
        let shared = GraphQuery::SharedGenes {
            disease_id: "DOID:1",
            limit: 10,
        }
        .cypher();
        assert!(shared[0].statement.contains("[0..3] AS related_diseases"));
    }

    #[test]
    fn empty_statement_list_skips_the_request() {
        let source = Neo4jSource::new(Neo4jConfig::new("http://127.0.0.1:9"));
        let rows = source
            .query(&GraphQuery::Related {
                kind: NodeKind::Anatomy,
                id: "UBERON:1",
                limit: 5,
            })
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn basic_auth_header() {
        let mut config = Neo4jConfig::new("http://localhost:7474/");
        config.user = Some("neo4j".into());
        config.password = Some("secret".into());
        let source = Neo4jSource::new(config);
        assert_eq!(
            source.commit_url(),
            "http://localhost:7474/db/neo4j/tx/commit"
        );
        assert_eq!(
            source.authorization().as_deref(),
            Some("Basic bmVvNGo6c2VjcmV0")
        );
    }

    #[test]
    fn unreachable_server_is_unavailable() {
        let mut config = Neo4jConfig::new("http://127.0.0.1:9");
        config.timeout_secs = 1;
        let source = Neo4jSource::new(config);
        let err = source.query(&GraphQuery::Nodes).unwrap_err();
        assert!(matches!(err, GraphError::Unavailable { .. }));
    }
}
