//! 进度流发射器
//!
//! 单消费者有界通道，序列号从 0 开始严格递增，每个事件渲染为
//! 一行 JSON 文本。消费者断开后发送失败，管线据此感知取消。

use std::sync::atomic::{AtomicU64, Ordering};

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use super::types::{EventKind, ProgressEvent};

/// 发射错误
#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    /// 消费者已断开，事件无法送达
    #[error("progress consumer disconnected")]
    Disconnected,
}

/// 进度事件发射器
///
/// 所有事件经由同一个发射器发出，保证序列号无间隙。
/// 通道容量有限，消费者读取缓慢时发送端自然被施加背压。
pub struct ProgressEmitter {
    tx: mpsc::Sender<ProgressEvent>,
    sequence: AtomicU64,
}

impl ProgressEmitter {
    /// 创建发射器与配套的接收端
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                sequence: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// 发送一个事件，分配下一个序列号
    pub async fn emit(
        &self,
        kind: EventKind,
        message: impl Into<String>,
        payload: Option<Value>,
    ) -> Result<(), EmitterError> {
        let event = ProgressEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            kind,
            message: message.into(),
            payload,
        };
        debug!("Emitting event #{} ({:?})", event.sequence, event.kind);
        self.tx
            .send(event)
            .await
            .map_err(|_| EmitterError::Disconnected)
    }

    /// 一般信息事件
    pub async fn info(&self, message: impl Into<String>) -> Result<(), EmitterError> {
        self.emit(EventKind::Info, message, None).await
    }

    /// 单文件结果事件
    pub async fn file_result(
        &self,
        message: impl Into<String>,
        payload: Value,
    ) -> Result<(), EmitterError> {
        self.emit(EventKind::FileResult, message, Some(payload)).await
    }

    /// 错误事件（非终止，运行可以继续）
    pub async fn error(
        &self,
        message: impl Into<String>,
        payload: Option<Value>,
    ) -> Result<(), EmitterError> {
        self.emit(EventKind::Error, message, payload).await
    }

    /// 终止事件，发出后不得再发送任何事件
    pub async fn terminal(
        &self,
        message: impl Into<String>,
        payload: Value,
    ) -> Result<(), EmitterError> {
        self.emit(EventKind::Terminal, message, Some(payload)).await
    }

    /// 消费者是否已断开
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 将事件接收端转换为按行渲染的文本流
///
/// 每个事件序列化为一行 JSON 并附加换行符，下游可直接作为
/// 行分隔文本响应体转发
pub fn event_lines(rx: mpsc::Receiver<ProgressEvent>) -> impl Stream<Item = String> {
    ReceiverStream::new(rx).map(|event| {
        let mut line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        line
    })
}
