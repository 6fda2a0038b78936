//! # eddy
//!
//! `eddy` 是一个 Disruptor 风格的多生产者/多订阅者广播处理器。
//! 所有活跃订阅者按同一个全序观察到每一个发布的值；每个订阅者
//! 运行在自己专属的工作线程上，并通过 `request(n)` 的需求计数
//! 实现各自独立的背压。
//!
//! ## 核心特性
//!
//! * **Disruptor 风格：** 预分配的 2 的幂环形缓冲区，生产者通过
//!   序列器（Sequencer）认领槽位，消费者用门控游标（gating cursor）
//!   限制生产者，不会覆盖未消费的数据。
//! * **广播（Fan-out）：** 任意数量的订阅者独立、并行地消费同一个
//!   事件流，彼此之间只受环形缓冲区大小的约束。
//! * **按需背压：** 订阅者用 `request(n)` 申请配额；配额耗尽时它的
//!   消费循环停下来，环满时生产者随之阻塞。
//! * **可插拔等待策略：** busy-spin、yielding、parking、lite-blocking
//!   和 phased-off，按延迟和 CPU 占用的取舍在构造时选择。
//! * **迟到订阅者冷回放：** 已终止的处理器不拒绝订阅者，残留在环里
//!   的尾部数据加上终止信号由一次性的冷回放源补发。
//!
//! ## 如何使用
//!
//! ```rust
//! use eddy::{Subscriber, Subscription, Topic, UNBOUNDED};
//! use std::sync::mpsc::Sender;
//! use std::sync::Arc;
//!
//! struct Collect(Sender<i32>);
//!
//! impl Subscriber<i32> for Collect {
//!     fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) -> Result<(), eddy::Error> {
//!         subscription.request(UNBOUNDED);
//!         Ok(())
//!     }
//!
//!     fn on_next(&mut self, value: &i32) -> Result<(), eddy::Error> {
//!         self.0.send(*value).ok();
//!         Ok(())
//!     }
//!
//!     fn on_error(&mut self, _error: eddy::Error) {}
//!
//!     fn on_complete(&mut self) {}
//! }
//!
//! let topic: Topic<i32> = Topic::builder().name("quotes").buffer_size(8).build();
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! topic.subscribe(Collect(tx));
//!
//! for i in 0..3 {
//!     // publish 在环满时阻塞，直到订阅者腾出空间。
//!     topic.publish(i).unwrap();
//! }
//! topic.complete();
//!
//! let received: Vec<i32> = rx.iter().take(3).collect();
//! assert_eq!(received, vec![0, 1, 2]);
//! ```

mod barrier;
mod bus;
mod consumer;
mod cursor;
mod error;
mod executor;
mod reactive;
mod replay;
mod request;
mod ring_buffer;
mod sequence;
mod sequencer;
mod topic;
mod wait;

pub use error::{Alert, EddyError, Error};
pub use executor::{DedicatedThreads, Executor, RejectedExecution, Task};
pub use reactive::{EmptySubscription, Publisher, Subscriber, Subscription, UNBOUNDED};
pub use topic::{Topic, TopicBuilder, SMALL_BUFFER_SIZE};
pub use wait::{BusySpin, LiteBlocking, Parking, PhasedOff, WaitStrategy, Yielding};
