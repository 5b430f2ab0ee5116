#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`queue`]: 소스 리더와 배처 사이의 유한 용량 라인 큐
//! - [`batcher`]: 크기/시간 트리거 배치 상태 머신
//! - [`codec`]: 배치 직렬화 및 AEAD 암호화 봉투
//! - [`auth`]: 요청 인증 헤더 제공자
//! - [`tls`]: rustls 클라이언트 설정 구성
//! - [`sender`]: HTTP 전송 및 재시도/백오프
//! - [`source`]: 소스 리더 trait 및 파일 소스
//! - [`telemetry`]: 배치/전송 관측 훅
//! - [`pipeline`]: 전체 파이프라인 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 변환)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! LineSource* -> LineQueue -> Batcher -> encode -> HttpSender -> collector
//!                                           |           |
//!                                     AES-GCM/ChaCha   Auth + TLS + retry
//! ```

pub mod auth;
pub mod batcher;
pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod sender;
pub mod source;
pub mod telemetry;
pub mod tls;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{ShipperPipeline, ShipperPipelineBuilder, StatsSnapshot};

// 설정
pub use config::{ShipperConfig, ShipperConfigBuilder};

// 에러
pub use error::{DecryptionError, DeliveryError, DeliveryFailure, EncodingError, ShipperError};

// 배치
pub use batcher::{Batch, BatchState, Batcher};

// 큐
pub use queue::{LineReceiver, LineSender, line_queue};

// 코덱
pub use codec::{Algorithm, EncryptionKey, Envelope};

// 인증 / TLS
pub use auth::AuthProvider;
pub use tls::TlsTransport;

// 전송
pub use sender::{DeliveryReport, HttpSender, RetryPolicy};

// 소스
pub use source::{FileSource, LineSource};

// 텔레메트리
pub use telemetry::{AttemptOutcome, FlushTrigger, MetricsTelemetry, NoopTelemetry, TelemetryHooks};
