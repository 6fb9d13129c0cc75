//! End-to-end flows through the assembled workbench: Rails log lines in,
//! analytics and events out.

use ry_core::db::NullDriver;
use ry_core::logs::LogFilter;
use ry_core::Workbench;
use ry_common::ProcessDefinition;
use ry_config::RailyardConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn rails_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Gemfile"), "gem 'rails'\n").unwrap();
    std::fs::create_dir(dir.path().join("config")).unwrap();
    std::fs::write(dir.path().join("config").join("application.rb"), "").unwrap();
    dir
}

fn workbench_in(root: &Path) -> Arc<Workbench> {
    Workbench::new(root, RailyardConfig::default(), Arc::new(NullDriver::new()))
}

#[tokio::test]
async fn n_plus_one_detected_from_request_log_group() {
    let dir = rails_project();
    let workbench = workbench_in(dir.path());

    workbench.pipeline.ingest(
        "web",
        r#"Started GET "/users" for 127.0.0.1 at 2026-01-15 14:30:22 +0000"#,
    );
    workbench
        .pipeline
        .ingest("web", "Processing by UsersController#index as HTML");
    for id in 1..=7 {
        workbench.pipeline.ingest(
            "web",
            &format!(
                r#"  User Load (1.1ms)  SELECT "users".* FROM "users" WHERE "users"."id" = {}"#,
                id
            ),
        );
    }
    workbench
        .pipeline
        .ingest("web", "Completed 200 OK in 23ms (Views: 12.1ms | ActiveRecord: 7.7ms)");

    let warnings = workbench.n1_warnings();
    assert_eq!(warnings.len(), 1);
    let warning = &warnings[0];
    assert_eq!(warning.table, "users");
    assert_eq!(warning.count, 7);
    assert!(warning.confidence >= 50);
    assert!(warning.suggestion.to_lowercase().contains("eager loading"));
    assert!(warning.examples.len() <= 3);

    let groups = workbench.request_query_groups(10);
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.queries.len(), 7);
    assert_eq!(group.total_duration_ms, 23.0);
    // 100 - 7*5 - 15 = 50
    assert_eq!(group.health_score, 50);

    // The digest surfaces the pattern as a high-severity recommendation.
    let recommendations = workbench.smart_recommendations();
    assert!(!recommendations.is_empty());

    // The request also landed in the endpoint metrics.
    let metrics = workbench.metrics_snapshot();
    assert_eq!(metrics.endpoints.len(), 1);
    assert_eq!(metrics.endpoints[0].endpoint, "GET /users");
    assert_eq!(metrics.endpoints[0].requests, 1);

    workbench.shutdown().await;
}

#[tokio::test]
async fn per_process_line_order_preserved_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("emit.sh");
    std::fs::write(
        &script,
        "i=1\nwhile [ \"$i\" -le 200 ]; do\n  echo \"line-$i\"\n  i=$((i+1))\ndone\n",
    )
    .unwrap();

    let workbench = workbench_in(dir.path());
    let mut rx = workbench.pipeline.subscribe();

    let mut def = ProcessDefinition::new("emitter", "sh");
    def.args = vec![script.display().to_string()];
    workbench.processes.add(def).unwrap();
    workbench.processes.start("emitter").unwrap();

    let mut received = Vec::new();
    while received.len() < 200 {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(line)) => received.push(line),
            _ => break,
        }
    }

    assert_eq!(received.len(), 200, "lost lines in the pipeline");
    for (i, line) in received.iter().enumerate() {
        assert_eq!(line.content, format!("line-{}", i + 1), "order broken at {}", i);
    }
    // Ids are gapless and monotonically increasing.
    for pair in received.windows(2) {
        assert_eq!(pair[1].id, pair[0].id + 1);
    }

    // The ring snapshot agrees with the stream.
    let snapshot = workbench.logs(&LogFilter {
        process: Some("emitter".to_string()),
        level: None,
        limit: Some(5),
    });
    assert_eq!(snapshot.last().unwrap().content, "line-200");

    workbench.shutdown().await;
}

#[tokio::test]
async fn exception_block_grouped_and_resolvable() {
    let dir = rails_project();
    let workbench = workbench_in(dir.path());

    for _ in 0..3 {
        workbench
            .pipeline
            .ingest("web", "NoMethodError (undefined method `name' for nil):");
        workbench
            .pipeline
            .ingest("web", "  app/models/user.rb:42:in `find_name'");
        workbench
            .pipeline
            .ingest("web", "  app/controllers/users_controller.rb:10:in `show'");
        workbench.pipeline.ingest("web", "-- end of block --");
    }

    let exceptions = workbench.exceptions_list();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].count, 3);
    assert_eq!(exceptions[0].exception_type, "NoMethodError");
    assert_eq!(exceptions[0].file.as_deref(), Some("app/models/user.rb"));

    assert!(workbench.exception_resolve(&exceptions[0].id));
    assert!(workbench.exceptions_list()[0].resolved);

    workbench.shutdown().await;
}

#[tokio::test]
async fn slow_sql_shapes_earn_recommendations() {
    let dir = rails_project();
    let workbench = workbench_in(dir.path());

    for _ in 0..3 {
        workbench.pipeline.ingest(
            "web",
            r#"  Report Load (750.0ms)  SELECT * FROM "reports" ORDER BY created_at DESC"#,
        );
    }

    let stats = workbench.query_statistics();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].count, 3);
    assert!(stats[0].avg_ms > 500.0);

    let recommendations = workbench.smart_recommendations();
    assert_eq!(recommendations.len(), 1);
    assert!(recommendations[0].fix_template.starts_with("EXPLAIN"));

    workbench.shutdown().await;
}
