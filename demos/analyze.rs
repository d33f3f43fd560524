use mealsmith::prelude::*;
use std::sync::Arc;

fn scripted_backend() -> InMemoryBackend {
    let submission = Submission::new(serde_json::json!({
        "foods": ["rice", "grilled salmon", "broccoli"],
        "calories": 640
    }))
    .with_tasks(
        AsyncTasks::new()
            .with(TaskKind::GlucoseTrend, "trend-1")
            .with(TaskKind::EatingOrder, "order-1"),
    )
    .with_record_id("record-1");

    let trend = TaskSnapshot::new("trend-1", TaskKind::GlucoseTrend, TaskStatus::Completed).with_result(
        TaskPayload {
            peak_value: Some(152.0),
            peak_time: Some("45min".to_string()),
            ..Default::default()
        },
    );

    InMemoryBackend::new()
        .with_submission(submission)
        .with_task(
            "trend-1",
            [
                TaskSnapshot::new("trend-1", TaskKind::GlucoseTrend, TaskStatus::Pending),
                TaskSnapshot::new("trend-1", TaskKind::GlucoseTrend, TaskStatus::Running),
                trend,
            ],
        )
        .with_task(
            "order-1",
            [TaskSnapshot::new("order-1", TaskKind::EatingOrder, TaskStatus::Completed)],
        )
}

#[tokio::main]
async fn main() -> MealsmithResult<()> {
    // Point MEALSMITH_BASE_URL at a real server to use HTTP instead
    let config = MealsmithConfig::from_env()?;
    mealsmith::logging::init(&config.logging)?;

    let analyzer = if std::env::var("MEALSMITH_BASE_URL").is_ok() {
        MealAnalyzer::http(config)?
    } else {
        MealAnalyzer::new(Arc::new(scripted_backend()), config)?
    };

    let photo = vec![0xFF, 0xD8, 0xFF, 0xE0];
    let (submission, mut tracker) = analyzer
        .submit_and_track(Upload::new(photo, "demo-user").with_file_name("lunch.jpg"))
        .await?;

    println!("🍽️  Analysis: {}", submission.analysis_result.as_value());
    println!("⏳ Waiting for {} background tasks...", tracker.len());

    while let Some(result) = tracker.next().await {
        match result.outcome {
            Ok(TaskOutcome::GlucoseTrend(forecast)) => println!(
                "📈 Peak {} mg/dL at {} ({:?} impact, {:?})",
                forecast.peak_value, forecast.peak_time, forecast.impact, forecast.source
            ),
            Ok(TaskOutcome::EatingOrder(advice)) => {
                println!("🥦 {} ({:?})", advice.title, advice.source);
                for tip in advice.tips {
                    println!("   {}. {}", tip.order, tip.title);
                }
            }
            Err(error) => println!(
                "⚠️  {} failed: {}",
                result.kind,
                error.user_message("analysis unavailable")
            ),
        }
    }

    Ok(())
}
