//! 重平衡节流
//!
//! 令牌桶限制顶层循环的迭代频率，失败循环不会冲击元数据存储。

use tokio::time::{Duration, Instant, sleep_until};

pub(crate) struct TokenBucket {
    tokens: u32,
    capacity: u32,
    refill: Duration,
    refreshed: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill: Duration) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill,
            refreshed: Instant::now(),
        }
    }

    /// 取走一个令牌，桶空时等待补充
    pub async fn acquire(&mut self) {
        loop {
            self.refresh();
            if self.tokens > 0 {
                break;
            }
            sleep_until(self.refreshed + self.refill).await;
        }
        self.tokens -= 1;
        if self.tokens + 1 == self.capacity {
            // 满桶期间不积累时间，消耗从此刻起算
            self.refreshed = Instant::now();
        }
    }

    fn refresh(&mut self) {
        while self.tokens < self.capacity && self.refreshed.elapsed() >= self.refill {
            self.refreshed += self.refill;
            self.tokens += 1;
        }
    }
}
