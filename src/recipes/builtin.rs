//! Recipes that ship with extbrew.
//!
//! Only extensions whose build differs from the generic
//! `phpize && ./configure && make` need an entry here.

use crate::core::{ExtensionRecipe, ProviderSpec};

pub fn recipes() -> Vec<ExtensionRecipe> {
    vec![
        ExtensionRecipe::generic("xdebug")
            .with_flags(["--enable-xdebug"])
            .with_php_versions(">=7.2")
            .zend(),
        ExtensionRecipe::generic("yaml").with_flags(["--with-yaml"]),
        ExtensionRecipe::generic("imagick").with_flags(["--with-imagick"]),
        ExtensionRecipe::generic("redis")
            .with_flags(["--enable-redis", "--disable-redis-igbinary", "--disable-redis-lzf"]),
        ExtensionRecipe::generic("swoole")
            .with_provider(ProviderSpec::github("swoole", "swoole-src"))
            .with_flags(["--enable-swoole", "--enable-sockets"])
            .with_php_versions(">=8.0"),
        ExtensionRecipe::generic("opcache")
            .with_flags(["--enable-opcache"])
            .bundled()
            .zend(),
    ]
}
