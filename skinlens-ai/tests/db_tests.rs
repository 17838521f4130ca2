//! File-backed record store tests

use skinlens_ai::db::{init_database_pool, RecordStore, SqliteRecordStore};
use skinlens_ai::fusion::{fallback_ensemble, CanonicalMapper};
use skinlens_ai::types::{AnalysisFocus, AnalysisRecord, AnalysisTier, EnrichmentSet};
use tempfile::TempDir;

fn record(tier: AnalysisTier) -> AnalysisRecord {
    CanonicalMapper::default().to_record(
        fallback_ensemble(),
        tier,
        AnalysisFocus::Texture,
        EnrichmentSet::default(),
    )
}

#[tokio::test]
async fn test_database_file_is_created_in_nested_folder() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("skinlens.db");

    let pool = init_database_pool(&db_path).await.unwrap();
    pool.close().await;

    assert!(db_path.exists());
}

#[tokio::test]
async fn test_records_survive_reopening() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("skinlens.db");
    let saved = record(AnalysisTier::Clinical);

    {
        let pool = init_database_pool(&db_path).await.unwrap();
        SqliteRecordStore::new(pool.clone()).save(&saved).await.unwrap();
        pool.close().await;
    }

    let pool = init_database_pool(&db_path).await.unwrap();
    let store = SqliteRecordStore::new(pool);
    let fetched = store.fetch(saved.id).await.unwrap().unwrap();

    assert_eq!(fetched.id, saved.id);
    assert_eq!(fetched.tier, AnalysisTier::Clinical);
    assert_eq!(fetched.focus, AnalysisFocus::Texture);
    assert!(fetched.is_fallback);
    assert_eq!(store.count().await.unwrap(), 1);
}
