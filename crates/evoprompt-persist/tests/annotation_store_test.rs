use std::sync::Arc;

use evoprompt_persist::{
    AnnotationStore, MemoryAnnotationStore, NewAnnotation, PromptType, SqliteAnnotationStore,
    SqliteConfig,
};
use uuid::Uuid;

async fn exercise_store(store: Arc<dyn AnnotationStore>) -> Result<(), Box<dyn std::error::Error>> {
    let round_0 = Uuid::new_v4();
    let round_1 = Uuid::new_v4();

    // 1. Two lineages in generation 0, same evaluator prompt
    for (prompt, output) in [("Be brief", "Short."), ("Be vivid", "Crimson dusk.")] {
        store
            .store_record(NewAnnotation {
                input: "Describe a sunset",
                content: output,
                generator_prompt: prompt,
                evaluator_prompt: Some("Rate {content} given {input}"),
                evaluator_generation: 0,
                prompt_generation: 0,
                round_id: round_0,
            })
            .await
            .ok_or("store failed")?;
    }

    // 2. Evolved prompts in generation 1 with an evolved evaluator prompt
    let last = store
        .store_record(NewAnnotation {
            input: "Describe a sunset",
            content: "The sky bled amber.",
            generator_prompt: "Be vivid and concrete",
            evaluator_prompt: Some("Strictly rate {content} given {input}"),
            evaluator_generation: 1,
            prompt_generation: 1,
            round_id: round_1,
        })
        .await
        .ok_or("store failed")?;

    // 3. Generator prompts come back ordered by generation
    let generator = store.get_prompts_from_records(PromptType::Generator).await?;
    let view: Vec<(&str, u32)> = generator
        .iter()
        .map(|p| (p.content.as_str(), p.generation))
        .collect();
    assert_eq!(
        view,
        vec![("Be brief", 0), ("Be vivid", 0), ("Be vivid and concrete", 1)]
    );

    // 4. Evaluator prompts are deduplicated per generation
    let evaluator = store.get_prompts_from_records(PromptType::Evaluator).await?;
    assert_eq!(evaluator.len(), 2);
    assert!(evaluator.iter().all(|p| p.prompt_type == PromptType::Evaluator));
    let generations: Vec<u32> = evaluator.iter().map(|p| p.generation).collect();
    assert_eq!(generations, vec![0, 1]);

    // 5. Output lookups resolve back to prompt text
    let record = store.get_output(last).await?;
    assert_eq!(record.round_id, round_1);
    assert_eq!(record.content, "The sky bled amber.");
    assert_eq!(
        store.get_prompt_text(record.generator_prompt_id).await?,
        "Be vivid and concrete"
    );
    let evaluator_id = record.evaluator_prompt_id.ok_or("missing evaluator prompt")?;
    assert_eq!(
        store.get_prompt_text(evaluator_id).await?,
        "Strictly rate {content} given {input}"
    );

    Ok(())
}

#[tokio::test]
async fn test_memory_store_contract() -> Result<(), Box<dyn std::error::Error>> {
    exercise_store(Arc::new(MemoryAnnotationStore::new())).await
}

#[tokio::test]
async fn test_sqlite_store_contract() -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteAnnotationStore::new_with_config(SqliteConfig::memory()).await?;
    exercise_store(Arc::new(store)).await
}
