use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use batchload_rs::{Aggregator, BatchFunction, BoxError, TaskList};

// Resolves movie titles from a HashMap, one batch at a time. Duplicate keys in a batch are looked
// up once.
struct MovieLookup {
    titles: HashMap<i64, String>,
}

#[async_trait]
impl BatchFunction<i64, String> for MovieLookup {
    async fn process(&self, tasks: TaskList<i64, String>) -> Result<(), BoxError> {
        tracing::info!(keys = ?tasks.values().collect::<Vec<_>>(), "looking up batch");
        for (key, duplicates) in &tasks.group() {
            if let Some(title) = self.titles.get(key) {
                duplicates.complete(title.clone());
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let mut titles = HashMap::new();
    titles.insert(2001, "a space odyssey".to_owned());
    titles.insert(7, "samurai".to_owned());
    titles.insert(12, "angry men".to_owned());

    let aggregator = Aggregator::<i64, String>::builder()
        .batch_fn(MovieLookup { titles })
        .max_wait(Duration::from_millis(5))
        .max_size(16)
        .build()?;
    aggregator.start(2)?;

    assert_eq!(aggregator.submit_and_wait(7).await?.as_deref(), Some("samurai"));
    assert_eq!(aggregator.submit_and_wait(15).await?, None);

    let results = aggregator.submit_many(vec![12, 2010, 2001, 12]).await;
    assert_eq!(
        results.into_iter().collect::<Result<Vec<_>, _>>()?,
        vec![
            Some("angry men".to_owned()),
            None,
            Some("a space odyssey".to_owned()),
            Some("angry men".to_owned())
        ]
    );

    aggregator.shutdown().await;
    Ok(())
}
