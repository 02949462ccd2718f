use crate::model::osm::Osmid;
use thiserror::Error;

/// error type shared by both import pipelines.
///
/// the Display rendering of the referential and persistence variants is a
/// stable contract: downstream log-scrapers match on the literal tokens
/// (`UNRESOLVED-NODE`, `sqlite3_step() error:`, ...), so the formats below
/// must not be reworded.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("{0}")]
    Setup(String),
    #[error("XML parse error: {0}")]
    Parse(String),
    #[error("UNRESOLVED-NODE {0}")]
    UnresolvedNode(Osmid),
    #[error("UNRESOLVED-WAY {0}")]
    UnresolvedWay(Osmid),
    #[error("ILLEGAL MULTIPOLYGON {0}")]
    IllegalMultipolygon(Osmid),
    #[error("sqlite3_step() error: {0}")]
    Step(String),
    #[error("CREATE TABLE '{table}' error: {source}")]
    CreateTable {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("BEGIN TRANSACTION error: {0}")]
    Begin(#[source] rusqlite::Error),
    #[error("COMMIT TRANSACTION error: {0}")]
    Commit(#[source] rusqlite::Error),
    #[error("VACUUM error: {0}")]
    Vacuum(#[source] rusqlite::Error),
    #[error("geometry codec failure: {0}")]
    Geometry(String),
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// whether this error invalidates a single entity (log it, drop the
    /// entity, keep streaming) rather than the whole pipeline.
    pub fn is_entity_local(&self) -> bool {
        matches!(
            self,
            BuildError::UnresolvedNode(_)
                | BuildError::UnresolvedWay(_)
                | BuildError::IllegalMultipolygon(_)
                | BuildError::Step(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::BuildError;

    #[test]
    fn test_diagnostic_tokens_are_stable() {
        assert_eq!(
            BuildError::UnresolvedNode(42).to_string(),
            "UNRESOLVED-NODE 42"
        );
        assert_eq!(
            BuildError::UnresolvedWay(-7).to_string(),
            "UNRESOLVED-WAY -7"
        );
        assert_eq!(
            BuildError::IllegalMultipolygon(9).to_string(),
            "ILLEGAL MULTIPOLYGON 9"
        );
        assert!(BuildError::Step(String::from("boom"))
            .to_string()
            .starts_with("sqlite3_step() error:"));
    }

    #[test]
    fn test_entity_local_classification() {
        assert!(BuildError::UnresolvedNode(1).is_entity_local());
        assert!(BuildError::Step(String::new()).is_entity_local());
        assert!(!BuildError::Setup(String::new()).is_entity_local());
        assert!(!BuildError::Parse(String::new()).is_entity_local());
    }
}
