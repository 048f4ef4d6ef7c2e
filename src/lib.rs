#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 <div align="center">
   <h1>resumable-batch</h1>
   <h3>Restartable, chunk-oriented batch jobs with retry and skip</h3>
 </div>

 # resumable-batch

 A batch job runs a sequence of steps. A chunk-oriented step reads items one
 at a time, processes them, and writes them in chunks, one transaction per
 chunk. Everything a job does is recorded in a job repository, so that a job
 that failed or was stopped can be restarted from the last committed chunk.

 ## Core Concepts

- **Job:** a sequence of steps. Each run of a job for a set of identifying
  parameters is a `JobExecution` of one `JobInstance`.
- **Step:** an independent phase of a job. A `TaskletStep` calls its tasklet
  repeatedly, each call in its own transaction, until it is finished.
- **Chunk:** the items read, processed and written within one transaction.
- **ItemReader / ItemProcessor / ItemWriter:** the collaborators of a
  chunk-oriented step.
- **JobRepository:** stores instances, executions and their execution
  contexts, and refuses to run an instance twice at the same time or again
  once complete.
- **Fault tolerance:** a failed item can be retried, then skipped, within a
  skip limit. A chunk whose write keeps failing is written again one item
  per transaction to isolate the failing item.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available features                                |

 ## Getting Started

```rust
# use resumable_batch::{
#     BatchError,
#     core::{
#         item::{ItemProcessor, ItemProcessorResult},
#         job::JobBuilder,
#         launch::SimpleJobLauncher,
#         parameters::JobParametersBuilder,
#         status::BatchStatus,
#         step::StepBuilder,
#     },
#     item::list::{ListItemReader, ListItemWriter},
#     repository::InMemoryJobRepository,
# };
struct ParseAmount;

impl ItemProcessor<String, u32> for ParseAmount {
    fn process(&self, item: &String) -> ItemProcessorResult<u32> {
        item.trim()
            .parse()
            .map(Some)
            .map_err(|_| BatchError::ItemProcessor(format!("not an amount: {item}")))
    }
}

fn main() -> Result<(), BatchError> {
    let lines = vec!["12".to_string(), "oops".to_string(), "30".to_string()];

    let repository = InMemoryJobRepository::new();
    let reader = ListItemReader::new(lines);
    let writer = ListItemWriter::new();

    let step = StepBuilder::new("load-amounts")
        .repository(&repository)
        .chunk(2) // set commit interval
        .reader(&reader)
        .processor(&ParseAmount)
        .writer(&writer)
        .fault_tolerant()
        .skip_limit(1) // tolerate one bad line
        .skip(|error| matches!(error, BatchError::ItemProcessor(_)))
        .build()?;

    let job = JobBuilder::new()
        .name("amounts".to_string())
        .repository(&repository)
        .start(&step)
        .build()?;

    let parameters = JobParametersBuilder::new().add_string("file", "amounts.txt").build();
    let execution = SimpleJobLauncher::new(&repository).run(&job, &parameters)?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(writer.items(), vec![12, 30]);
    assert_eq!(execution.step_executions[0].process_skip_count, 1);

    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.

 ## Contribution
 Unless you explicitly state otherwise, any contribution intentionally submitted
 for inclusion in the work by you, as defined in the Apache-2.0 license, shall be
 dual licensed as above, without any additional terms or conditions

 */

/// Error classification by ordered predicate rules
pub mod classify;

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of ready-made item readers and writers
pub mod item;

/// Repeat engine driving step and chunk loops
pub mod repeat;

/// Job metadata persistence
pub mod repository;

/// Retry engine
pub mod retry;
