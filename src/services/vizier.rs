//! # VizieR cone-search client
//!
//! Box searches against the VizieR `asu-tsv` endpoint. The reply is tab separated:
//! comment lines start with `#`, then come the column names, a units line, a dashed
//! separator line and the data rows, terminated by a blank line.
//!
//! ```text
//! #RESOURCE=yCat_5154
//! objID	RA_ICRS	DE_ICRS	fieldID	gmag
//!  	deg	deg	 	mag
//! ----	-------	-------	----	-----
//! 1237	150.001	2.0001	7	18.02
//! ```
//!
//! Only the first table of the reply is read. A reply without any table is an empty result.
use crate::catalog::{CatalogRow, CatalogTable};
use crate::env_state::PlannerEnv;
use crate::services::{CatalogService, ConeSearch};
use crate::skypatch_errors::{SkyPatchError, Stage};

pub const VIZIER_URL: &str = "https://vizier.cds.unistra.fr/viz-bin/asu-tsv";

#[derive(Debug, Clone)]
pub struct VizierClient {
    env: PlannerEnv,
    url: String,
}

impl VizierClient {
    pub fn new(env: PlannerEnv) -> Self {
        VizierClient {
            env,
            url: VIZIER_URL.to_string(),
        }
    }

    /// Point the client at a VizieR mirror.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Query parameters of a box search, without a row cap.
fn query_params<'a>(query: &ConeSearch<'a>) -> Vec<(&'a str, String)> {
    let mut params = vec![
        ("-source", query.catalog.service_id.clone()),
        (
            "-c",
            format!("{:.8} {:+.8}", query.center.ra, query.center.dec),
        ),
        ("-c.eq", "J2000".to_string()),
        ("-c.bm", format!("{}x{}", query.width, query.height)),
        ("-out.max", "unlimited".to_string()),
        ("-out.all", "1".to_string()),
        ("-oc.form", "d".to_string()),
    ];
    for (column, constraint) in &query.catalog.column_filters {
        params.push((column.as_str(), constraint.clone()));
    }
    params
}

impl CatalogService for VizierClient {
    fn cone_search(&self, query: &ConeSearch<'_>) -> Result<CatalogTable, SkyPatchError> {
        let identifier = &query.catalog.service_id;
        let reply = self
            .env
            .get_text(Stage::Catalog, identifier, &self.url, &query_params(query))?;
        parse_tsv(identifier, &reply)
    }
}

/// Parse the first table of an `asu-tsv` reply.
pub(crate) fn parse_tsv(identifier: &str, reply: &str) -> Result<CatalogTable, SkyPatchError> {
    let mut lines = reply
        .lines()
        .skip_while(|l| l.starts_with('#') || l.trim().is_empty());

    let Some(header) = lines.next() else {
        return Ok(CatalogTable::empty());
    };

    // Units and separator lines come before the first data row.
    let body: Vec<&str> = lines
        .skip_while(|l| !l.starts_with('-'))
        .skip(1)
        .take_while(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .collect();

    let table = std::iter::once(header)
        .chain(body.iter().copied())
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .quoting(false)
        .from_reader(table.as_bytes());

    let query_error = |e: csv::Error| SkyPatchError::CatalogQuery {
        identifier: identifier.to_string(),
        reason: format!("malformed reply: {e}"),
    };

    let columns: Vec<String> = reader
        .headers()
        .map_err(query_error)?
        .iter()
        .map(str::to_string)
        .collect();

    let rows = reader
        .records()
        .map(|record| {
            record.map(|r| CatalogRow {
                cells: r.iter().map(str::to_string).collect(),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_error)?;

    CatalogTable::new(columns, rows).map_err(|e| SkyPatchError::CatalogQuery {
        identifier: identifier.to_string(),
        reason: e.to_string(),
    })
}
