use crossbeam::queue::ArrayQueue;
use muqun::errors::SourceError;
use rdkafka::{ClientConfig, consumer::BaseConsumer};
use std::{ops::Deref, sync::Arc};
use tracing::debug;

/// 元数据消费者池，水位与元数据查询复用连接
pub(crate) struct MetaPool {
    consumers: Arc<ArrayQueue<BaseConsumer>>,
    config: ClientConfig,
}

impl MetaPool {
    pub(crate) fn new(config: ClientConfig, warm_size: usize) -> Self {
        let consumers = Arc::new(ArrayQueue::new(warm_size.max(1)));

        for _ in 0..warm_size {
            match config.create::<BaseConsumer>() {
                Ok(consumer) => {
                    let _ = consumers.push(consumer);
                }
                Err(e) => debug!("预热元数据消费者失败：{e}"),
            }
        }

        Self { consumers, config }
    }

    #[inline(always)]
    pub fn get(&self) -> Result<MetaGuard, SourceError> {
        match self.consumers.pop() {
            Some(consumer) => Ok(MetaGuard {
                consumer: Some(consumer),
                pool: Arc::clone(&self.consumers),
            }),
            None => match self.config.create::<BaseConsumer>() {
                Ok(consumer) => Ok(MetaGuard {
                    consumer: Some(consumer),
                    pool: Arc::clone(&self.consumers),
                }),
                Err(e) => Err(SourceError::Source(e.to_string())),
            },
        }
    }
}

pub(crate) struct MetaGuard {
    consumer: Option<BaseConsumer>,
    pool: Arc<ArrayQueue<BaseConsumer>>,
}

impl Deref for MetaGuard {
    type Target = BaseConsumer;

    fn deref(&self) -> &Self::Target {
        self.consumer.as_ref().unwrap()
    }
}

impl Drop for MetaGuard {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            let _ = self.pool.push(consumer);
        }
    }
}
