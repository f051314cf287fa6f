//! 网关配置接口（通道/设备/标签的增删改）
//!
//! 路径形如 `/config/v1/project/channels/{channel}/devices/{device}/tags/{tag}`，
//! 使用 Basic 认证。创建时对象已存在视为成功并尝试就地更新；删除时对象不存在视为成功。

use crate::error::GatewayError;
use crate::types::{ApplyOutcome, definition_name};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;

/// 网关配置接口抽象
#[async_trait]
pub trait GatewayConfigApi: Send + Sync {
    async fn create_or_update_channel(&self, definition: &Value)
    -> Result<ApplyOutcome, GatewayError>;

    async fn delete_channel(&self, channel: &str) -> Result<(), GatewayError>;

    async fn create_or_update_device(
        &self,
        channel: &str,
        definition: &Value,
    ) -> Result<ApplyOutcome, GatewayError>;

    async fn delete_device(&self, channel: &str, device: &str) -> Result<(), GatewayError>;

    async fn create_or_update_tag(
        &self,
        channel: &str,
        device: &str,
        definition: &Value,
    ) -> Result<ApplyOutcome, GatewayError>;

    async fn delete_tag(&self, channel: &str, device: &str, tag: &str)
    -> Result<(), GatewayError>;
}

/// REST 配置客户端参数
#[derive(Debug, Clone)]
pub struct RestConfigOptions {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// 基于 reqwest 的配置接口实现
pub struct RestGatewayConfig {
    client: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl RestGatewayConfig {
    pub fn new(options: RestConfigOptions) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&options.base_url)
            .map_err(|err| GatewayError::InvalidDefinition(format!("base url: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidDefinition(format!(
                "base url cannot be a base: {}",
                options.base_url
            )));
        }
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            username: options.username,
            password: options.password,
        })
    }

    /// `base/config/v1/project/<segments...>`，各段按路径规则转义
    fn url(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| GatewayError::InvalidDefinition("base url".to_string()))?;
            path.pop_if_empty().extend(["config", "v1", "project"]);
            path.extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(username) => builder.basic_auth(username, self.password.as_deref()),
            None => builder,
        }
    }

    /// POST 到集合地址；已存在时返回 [`GatewayError::AlreadyExists`]。
    async fn create(&self, collection: &[&str], definition: &Value) -> Result<(), GatewayError> {
        let name = definition_name(definition)?;
        let response = self
            .request(reqwest::Method::POST, self.url(collection)?)
            .json(definition)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if is_already_exists(status, &body) {
            return Err(GatewayError::AlreadyExists(name.to_string()));
        }
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    /// PUT 到对象地址；失败时整个调用失败。
    async fn update(&self, item: &[&str], definition: &Value) -> Result<(), GatewayError> {
        let response = self
            .request(reqwest::Method::PUT, self.url(item)?)
            .json(definition)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            target: "fleet.gateway",
            object = %item.join("/"),
            status = status.as_u16(),
            "update_after_exists_failed"
        );
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn create_or_update(
        &self,
        collection: &[&str],
        definition: &Value,
    ) -> Result<ApplyOutcome, GatewayError> {
        match self.create(collection, definition).await {
            Ok(()) => Ok(ApplyOutcome::Created),
            Err(GatewayError::AlreadyExists(name)) => {
                let mut item = collection.to_vec();
                item.push(&name);
                self.update(&item, definition).await?;
                Ok(ApplyOutcome::Updated)
            }
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, item: &[&str]) -> Result<(), GatewayError> {
        let response = self
            .request(reqwest::Method::DELETE, self.url(item)?)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

fn is_already_exists(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        || (status == StatusCode::BAD_REQUEST && body.to_ascii_lowercase().contains("already exists"))
}

#[async_trait]
impl GatewayConfigApi for RestGatewayConfig {
    async fn create_or_update_channel(
        &self,
        definition: &Value,
    ) -> Result<ApplyOutcome, GatewayError> {
        self.create_or_update(&["channels"], definition).await
    }

    async fn delete_channel(&self, channel: &str) -> Result<(), GatewayError> {
        self.delete(&["channels", channel]).await
    }

    async fn create_or_update_device(
        &self,
        channel: &str,
        definition: &Value,
    ) -> Result<ApplyOutcome, GatewayError> {
        self.create_or_update(&["channels", channel, "devices"], definition)
            .await
    }

    async fn delete_device(&self, channel: &str, device: &str) -> Result<(), GatewayError> {
        self.delete(&["channels", channel, "devices", device]).await
    }

    async fn create_or_update_tag(
        &self,
        channel: &str,
        device: &str,
        definition: &Value,
    ) -> Result<ApplyOutcome, GatewayError> {
        self.create_or_update(&["channels", channel, "devices", device, "tags"], definition)
            .await
    }

    async fn delete_tag(
        &self,
        channel: &str,
        device: &str,
        tag: &str,
    ) -> Result<(), GatewayError> {
        self.delete(&["channels", channel, "devices", device, "tags", tag])
            .await
    }
}
