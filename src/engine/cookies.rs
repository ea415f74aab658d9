//! Cookies: [`Cookie`], [`CookieJar`], [`CookieStore`] and backends, plus the
//! callback-based layer the request pipeline talks to ([`AsyncCookieStore`],
//! [`CookieManager`], [`CookieStoreProxy`]).

mod async_store;
mod cookie_jar;
#[allow(clippy::module_inception)]
mod cookies;
mod manager;
mod persistent_cookie_jar;
mod proxy;
mod store;

pub use cookies::Cookie;
pub use cookies::CookieJarHandle;
pub use cookies::CookieStoreHandle;

pub use cookie_jar::CookieJar;
pub use cookie_jar::DefaultCookieJar;
pub use persistent_cookie_jar::PersistentCookieJar;

pub use store::CookieStore;
pub use store::InMemoryCookieStore;
pub use store::JsonCookieStore;

pub use async_store::{
    AsyncCookieStore, CookieHeaderCallback, CookieListCallback, DeleteCookiesCallback, FlushCallback,
    JarCookieStore, SetCookieCallback,
};
pub use manager::CookieManager;
pub use proxy::{CookieStoreProxy, CookieStoreSource, HandlerCookieSource, ParentCookieSource};
