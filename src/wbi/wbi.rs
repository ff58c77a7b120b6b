// SPDX-License-Identifier: GPL-2.0-or-later

//! Wbi request signing: a time-rotating mixed key used to append a
//! `w_rid` parameter to API queries. Without it the playurl/view
//! endpoints reject the request.

use async_trait::async_trait;
use md5::{Digest, Md5};
use std::sync::Mutex;
use thiserror::Error;

/// Maps each output byte position to an input byte position in
/// `imgKey || subKey`; the mixin key is the first 32 output bytes.
pub const MIXIN_PERM: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

const MIXIN_KEY_LEN: usize = 32;

/// Refresh the cached key after this many seconds.
pub const KEY_MAX_AGE_SECS: i64 = 2 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WbiError {
    #[error("wbi image key unavailable in nav response")]
    KeyUnavailable,
}

/// Supplies the raw `(imgKey, subKey)` pair, normally by fetching and
/// parsing the nav endpoint. Abstracted behind a trait so tests can
/// inject a canned pair without a network dependency.
#[async_trait]
pub trait WbiKeyProvider: Send + Sync {
    async fn fetch_keys(&self) -> Result<(String, String), WbiError>;
}

/// Extracts `imgKey`/`subKey` from the nav endpoint's
/// `data.wbi_img.{img_url,sub_url}` filenames (stem, extension
/// stripped). Status `0` and `-101` (anonymous caller) both carry a
/// usable key.
#[must_use]
pub fn parse_nav_wbi_img(img_url: &str, sub_url: &str) -> Option<(String, String)> {
    Some((url_filename_stem(img_url)?, url_filename_stem(sub_url)?))
}

fn url_filename_stem(url: &str) -> Option<String> {
    let filename = url.rsplit('/').next()?;
    let stem = filename.split('.').next()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_owned())
    }
}

/// `mixinKey = take32(permute(imgKey || subKey, MIXIN_PERM))`.
#[must_use]
pub fn mixin_key(img_key: &str, sub_key: &str) -> String {
    let combined: Vec<u8> = img_key.bytes().chain(sub_key.bytes()).collect();
    let permuted: Vec<u8> = MIXIN_PERM
        .iter()
        .map(|&i| combined.get(i).copied().unwrap_or(0))
        .collect();
    permuted[..MIXIN_KEY_LEN.min(permuted.len())]
        .iter()
        .map(|b| *b as char)
        .collect()
}

/// `w_rid = md5_hex_lowercase(query || mixinKey)`. `query` must
/// already be the `&`-joined, URL-encoded parameter string including
/// `wts=<unix_seconds>`.
#[must_use]
pub fn sign(query: &str, mixin_key: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(query.as_bytes());
    hasher.update(mixin_key.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

struct CachedKey {
    img_key: String,
    sub_key: String,
    mixin_key: String,
    minted_at: i64,
}

/// Caches the mixed key process-wide for up to [`KEY_MAX_AGE_SECS`],
/// refreshing through a [`WbiKeyProvider`] on expiry or after an auth
/// failure.
pub struct WbiSigner<P> {
    provider: P,
    cache: Mutex<Option<CachedKey>>,
}

impl<P: WbiKeyProvider> WbiSigner<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            cache: Mutex::new(None),
        }
    }

    /// Forces the next `sign_query` call to refresh the key, e.g.
    /// after the caller observed an auth-related API error.
    pub fn invalidate(&self) {
        *self.cache.lock().expect("cache mutex poisoned") = None;
    }

    /// Signs `query`, appending `w_rid=<sig>`. `now_unix_secs` is
    /// supplied by the caller rather than read from the clock so
    /// signing is reproducible in tests.
    pub async fn sign_query(
        &self,
        query: &str,
        now_unix_secs: i64,
    ) -> Result<String, WbiError> {
        let mixin = self.mixin_key(now_unix_secs).await?;
        let sig = sign(query, &mixin);
        Ok(format!("{query}&w_rid={sig}"))
    }

    async fn mixin_key(&self, now_unix_secs: i64) -> Result<String, WbiError> {
        {
            let cache = self.cache.lock().expect("cache mutex poisoned");
            if let Some(cached) = cache.as_ref() {
                if now_unix_secs - cached.minted_at <= KEY_MAX_AGE_SECS {
                    return Ok(cached.mixin_key.clone());
                }
            }
        }

        let (img_key, sub_key) = self.provider.fetch_keys().await?;
        let mixin = mixin_key(&img_key, &sub_key);
        *self.cache.lock().expect("cache mutex poisoned") = Some(CachedKey {
            img_key,
            sub_key,
            mixin_key: mixin.clone(),
            minted_at: now_unix_secs,
        });
        Ok(mixin)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    struct FixedKeyProvider {
        img_key: &'static str,
        sub_key: &'static str,
    }

    #[async_trait]
    impl WbiKeyProvider for FixedKeyProvider {
        async fn fetch_keys(&self) -> Result<(String, String), WbiError> {
            Ok((self.img_key.to_owned(), self.sub_key.to_owned()))
        }
    }

    #[test]
    fn golden_vector() {
        let mixin = mixin_key(
            "7cd084941338484aae1ad9425b84077c",
            "4932caff0ff746eab6f01bf08b70ac45",
        );
        let w_rid = sign("foo=114&bar=514&wts=1702204169", &mixin);
        assert_eq!(w_rid, "8f6f2b5b3d485fe1886cca64c0f7a7b8");
    }

    #[test]
    fn nav_img_url_parses_filename_stem() {
        let (img, sub) = parse_nav_wbi_img(
            "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png",
            "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png",
        )
        .unwrap();
        assert_eq!(img, "7cd084941338484aae1ad9425b84077c");
        assert_eq!(sub, "4932caff0ff746eab6f01bf08b70ac45");
    }

    #[tokio::test]
    async fn sign_query_caches_and_refreshes() {
        let signer = WbiSigner::new(FixedKeyProvider {
            img_key: "7cd084941338484aae1ad9425b84077c",
            sub_key: "4932caff0ff746eab6f01bf08b70ac45",
        });

        let signed = signer
            .sign_query("foo=114&bar=514&wts=1702204169", 1_702_204_169)
            .await
            .unwrap();
        assert!(signed.ends_with("&w_rid=8f6f2b5b3d485fe1886cca64c0f7a7b8"));

        // Within the 2h window, no refetch is needed (can't observe
        // this directly without a spy, but a second call must still
        // succeed and agree).
        let signed_again = signer
            .sign_query("foo=114&bar=514&wts=1702204169", 1_702_204_169 + 10)
            .await
            .unwrap();
        assert_eq!(signed, signed_again);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let signer = WbiSigner::new(FixedKeyProvider {
            img_key: "7cd084941338484aae1ad9425b84077c",
            sub_key: "4932caff0ff746eab6f01bf08b70ac45",
        });
        signer.sign_query("a=1", 1000).await.unwrap();
        signer.invalidate();
        // After invalidation a fresh mixin is derived; with the same
        // provider output this still converges to the same value.
        let signed = signer.sign_query("a=1", 1000).await.unwrap();
        assert!(signed.starts_with("a=1&w_rid="));
    }
}
