//! 도메인 타입 -- 소스 리더와 배처 사이에서 공유되는 데이터

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 소스 리더가 생성하는 단일 로그 라인
///
/// 생성 이후 불변이며, 큐로 move 되어 배처가 정확히 한 번 소비합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// 로그 본문
    pub text: String,
    /// 소스 메타데이터 (파일 경로, 파드 이름 등)
    pub fields: BTreeMap<String, String>,
    /// 소스가 기록한 시각
    pub source_timestamp: DateTime<Utc>,
}

impl LogLine {
    /// 현재 시각을 타임스탬프로 하는 새 라인을 생성합니다.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fields: BTreeMap::new(),
            source_timestamp: Utc::now(),
        }
    }

    /// 메타데이터 필드를 추가합니다.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// 소스 타임스탬프를 지정합니다.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = timestamp;
        self
    }

    /// 본문의 바이트 길이
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// 본문이 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
