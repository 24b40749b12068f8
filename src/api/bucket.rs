use crate::api::client::ApiClient;
use crate::error::Result;

/// Object name for a freshly uploaded avatar. The extension is whatever
/// follows the last dot of the original file name; a name without a dot is
/// used whole.
pub fn avatar_file_name(user_id: &str, now_ms: i64, original_name: &str) -> String {
    let ext = original_name.rsplit('.').next().unwrap_or(original_name);
    format!("avatar-{user_id}-{now_ms}.{ext}")
}

/// Name of the stored object behind an avatar URL, if the URL points into
/// the avatar bucket at all.
pub fn stored_avatar_name(avatar_url: &str, bucket: &str) -> Option<String> {
    if !avatar_url.contains(&format!("{bucket}/")) {
        return None;
    }
    avatar_url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

impl ApiClient {
    pub fn public_url(&self, bucket: &str, name: &str) -> String {
        self.endpoint(&format!("storage/v1/object/public/{bucket}/{name}"))
    }

    pub async fn upload(&self, bucket: &str, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let req = self
            .http
            .post(self.endpoint(&format!("storage/v1/object/{bucket}/{name}")))
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes);
        log::debug!("uploading {bucket}/{name}");
        Self::send_empty(self.with_auth(req).await).await
    }

    pub async fn remove(&self, bucket: &str, names: &[String]) -> Result<()> {
        let req = self
            .http
            .delete(self.endpoint(&format!("storage/v1/object/{bucket}")))
            .json(&serde_json::json!({ "prefixes": names }));
        Self::send_empty(self.with_auth(req).await).await
    }
}
