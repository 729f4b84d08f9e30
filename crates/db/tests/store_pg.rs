//! PostgreSQL store behaviour. Needs `DATABASE_URL` pointing at a server
//! where `sqlx::test` may create scratch databases.

use assert_matches::assert_matches;
use datalabel_db::models::annotation::CreateAnnotation;
use datalabel_db::models::batch::NewBatch;
use datalabel_db::models::render_unit::NewRenderUnit;
use datalabel_db::models::status::TaskStatus;
use datalabel_db::models::task::{NewTask, Task};
use datalabel_db::models::worker::CreateWorker;
use datalabel_db::models::workflow::CreateWorkflow;
use datalabel_db::store::{PgStore, Store, StoreError};
use sqlx::PgPool;

async fn generating_task(store: &PgStore) -> Task {
    let workflow = store
        .insert_workflow(&CreateWorkflow {
            name: "flux".into(),
            version: "1".into(),
            max_batch_size: 4,
            document: serde_json::json!({"1": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}}}),
            slots: vec![],
        })
        .await
        .unwrap();
    let task = store
        .insert_task(&NewTask {
            workflow_id: workflow.id,
            variable_pool_ids: vec![],
            target_prompts: 3,
            seeds_per_prompt: 2,
            rng_seed: 42,
        })
        .await
        .unwrap();
    store
        .transition_task(task.id, &[TaskStatus::Pending], TaskStatus::Generating)
        .await
        .unwrap()
        .unwrap()
}

async fn append(store: &PgStore, task_id: i64, draw_index: i64) -> i64 {
    let unit = store
        .insert_unit(
            &NewRenderUnit {
                task_id,
                draw_index,
                prompt_text: format!("p{draw_index}"),
                combination: serde_json::json!({}),
                seeds: vec![1, 2],
            },
            &serde_json::json!({}),
        )
        .await
        .unwrap()
        .unwrap();
    store
        .append_batch(&NewBatch {
            task_id,
            render_unit_id: unit.id,
            prompt_text: unit.prompt_text.clone(),
            seeds: unit.seeds.clone(),
            thumbnails: vec!["a".into(), "b".into()],
            worker_id: None,
        })
        .await
        .unwrap()
        .unwrap()
        .id
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_health_check(pool: PgPool) {
    datalabel_db::health_check(&pool).await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_duplicate_worker_name_is_conflict(pool: PgPool) {
    let store = PgStore::new(pool);
    let input = CreateWorker {
        name: "gpu-1".into(),
        base_url: "http://127.0.0.1:8188".into(),
        api_key: None,
    };
    store.insert_worker(&input).await.unwrap();
    assert_matches!(store.insert_worker(&input).await, Err(StoreError::Conflict(_)));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_sequence_numbers_are_dense(pool: PgPool) {
    let store = PgStore::new(pool);
    let task = generating_task(&store).await;
    for i in 0..3 {
        append(&store, task.id, i).await;
    }
    let seqs: Vec<i64> = store
        .list_batches(task.id)
        .await
        .unwrap()
        .iter()
        .map(|b| b.sequence_number)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_annotation_is_recorded_once(pool: PgPool) {
    let store = PgStore::new(pool);
    let task = generating_task(&store).await;
    let batch_id = append(&store, task.id, 0).await;

    let input = CreateAnnotation {
        task_id: task.id,
        batch_id,
        chosen_index: Some(1),
        rejected_index: Some(0),
        spam: false,
        user_id: Some("u1".into()),
    };
    assert!(store.record_annotation(&input).await.unwrap().is_some());
    assert!(store.record_annotation(&input).await.unwrap().is_none());
    assert!(store.next_batches(task.id, 0, 10).await.unwrap().is_empty());
    assert_eq!(store.export_rows(task.id).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_finished_task_rejects_appends(pool: PgPool) {
    let store = PgStore::new(pool);
    let task = generating_task(&store).await;
    store
        .finish_task(task.id, TaskStatus::Failed, None, Some("cancelled"))
        .await
        .unwrap()
        .unwrap();
    let unit = store
        .insert_unit(
            &NewRenderUnit {
                task_id: task.id,
                draw_index: 0,
                prompt_text: "p".into(),
                combination: serde_json::json!({}),
                seeds: vec![1],
            },
            &serde_json::json!({}),
        )
        .await
        .unwrap();
    assert!(unit.is_none());
}
