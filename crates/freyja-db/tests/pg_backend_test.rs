//! PostgreSQL-backed tests for the primary query service and the job queue.
//!
//! These need a running database (`DATABASE_URL`, or the default test URL)
//! and are ignored by default:
//!
//! ```text
//! cargo test -p freyja-db -- --ignored
//! ```

use freyja_db::test_fixtures::TestDatabase;
use freyja_db::{
    FileMetadata, FileMetadataQuery, JobRepository, JobStatus, JobType, MetadataWriter,
    QueryService, Resource, ResourceFactory, ResourceId, ResourcePresence, MODEL_FILE_SET,
};
use serde_json::json;

// ============================================================================
// QUERY SERVICE
// ============================================================================

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_save_then_find_by() {
    let test_db = TestDatabase::new().await;
    let primary = test_db.db.query_service(ResourceFactory::new());

    primary
        .save(Resource::file_set("fs-1", vec!["f1".into()]).with_label("Page 1"))
        .await
        .unwrap();

    let found = primary.find_by(&"fs-1".into()).await.unwrap();
    assert_eq!(found.label.as_deref(), Some("Page 1"));
    assert_eq!(found.file_ids().unwrap(), &[ResourceId::new("f1")]);

    let err = primary.find_by(&"nope".into()).await.unwrap_err();
    assert!(err.is_not_found());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_legacy_model_names_are_found() {
    let test_db = TestDatabase::new().await;
    let primary = test_db.db.query_service(ResourceFactory::new());

    sqlx::query(
        "INSERT INTO orm_resources (id, internal_resource, metadata)
         VALUES ('fs-9', 'Hyrax::FileSet', $1)",
    )
    .bind(json!({"file_ids": [{"id": "f9"}]}))
    .execute(&test_db.pool)
    .await
    .unwrap();

    let file_sets = primary.find_all_of_model(MODEL_FILE_SET).await.unwrap();
    assert_eq!(file_sets.len(), 1);
    assert_eq!(primary.count_all_of_model(MODEL_FILE_SET).await.unwrap(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_find_many_and_presence_keep_request_order() {
    let test_db = TestDatabase::new().await;
    let primary = test_db.db.query_service(ResourceFactory::new());

    for id in ["a", "b", "c"] {
        primary.save(Resource::work(id)).await.unwrap();
    }

    let ids: Vec<ResourceId> = vec!["c".into(), "x".into(), "a".into()];
    let found = primary.find_many_by_ids(&ids).await.unwrap();
    let found_ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(found_ids, vec!["c", "a"]);

    let present = test_db.db.presence.find_present_ids(&ids).await.unwrap();
    assert_eq!(present, vec![ResourceId::new("c"), ResourceId::new("a")]);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_alternate_ids_and_inverse_references() {
    let test_db = TestDatabase::new().await;
    let primary = test_db.db.query_service(ResourceFactory::new());

    primary
        .save(Resource::work("w1").with_alternate_id("ark:/w1"))
        .await
        .unwrap();
    primary
        .save(Resource::file_set("fs-1", vec![]).with_attribute("parent_id", json!({"id": "w1"})))
        .await
        .unwrap();

    let work = primary
        .find_by_alternate_identifier(&"ark:/w1".into())
        .await
        .unwrap();
    assert_eq!(work.id, ResourceId::new("w1"));

    let children = primary
        .find_inverse_references_by(&"w1".into(), "parent_id")
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, ResourceId::new("fs-1"));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_file_metadata_lookup_skips_other_models() {
    let test_db = TestDatabase::new().await;
    let primary = test_db.db.query_service(ResourceFactory::new());

    primary
        .save(Resource::file_metadata_record(
            "f1",
            FileMetadata::new("disk:///var/freyja/f1.bin", "a.tif"),
        ))
        .await
        .unwrap();
    primary.save(Resource::work("w1")).await.unwrap();

    let files = primary
        .find_many_file_metadata_by_ids(&["w1".into(), "f1".into()])
        .await
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(
        files[0].file_metadata().unwrap().file_identifier,
        "disk:///var/freyja/f1.bin"
    );

    test_db.cleanup().await;
}

// ============================================================================
// JOB QUEUE
// ============================================================================

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_job_lifecycle() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs
        .queue(
            Some("fs-1".into()),
            JobType::MigrateFiles,
            0,
            Some(json!({"file_set_id": "fs-1"})),
        )
        .await
        .unwrap();
    assert_eq!(jobs.pending_count().await.unwrap(), 1);

    let claimed = jobs
        .claim_next_for_types(&[JobType::MigrateFiles])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, job_id);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.resource_id, Some(ResourceId::new("fs-1")));
    assert!(jobs.claim_next_for_types(&[]).await.unwrap().is_none());

    jobs.update_progress(job_id, 50, Some("halfway")).await.unwrap();
    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.progress_percent, 50);
    assert_eq!(job.progress_message.as_deref(), Some("halfway"));

    jobs.complete(job_id, Some(json!({"files": 1}))).await.unwrap();
    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_fail_retries_then_fails() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs
        .queue(None, JobType::MigrateFiles, 0, None)
        .await
        .unwrap();

    let max_retries = jobs.get(job_id).await.unwrap().unwrap().max_retries;
    for _ in 0..max_retries {
        jobs.claim_next_for_types(&[]).await.unwrap().unwrap();
        jobs.fail(job_id, "connection reset").await.unwrap();
        assert_eq!(
            jobs.get(job_id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
    }

    jobs.claim_next_for_types(&[]).await.unwrap().unwrap();
    jobs.fail(job_id, "connection reset").await.unwrap();
    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, max_retries);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_fail_permanently_skips_retries() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs
        .queue(None, JobType::MigrateFiles, 0, None)
        .await
        .unwrap();
    jobs.claim_next_for_types(&[]).await.unwrap().unwrap();
    jobs.fail_permanently(job_id, "file set is gone").await.unwrap();

    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.error_message.as_deref(), Some("file set is gone"));

    test_db.cleanup().await;
}
