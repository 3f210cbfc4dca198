use std::path::PathBuf;

/// Разрешение алиасов импортов вида `@/components/Post.vue`
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    // Отсортированы по убыванию длины токена
    entries: Vec<(String, PathBuf)>,
}

impl AliasResolver {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        let mut entries: Vec<_> = entries
            .into_iter()
            .filter(|(token, _)| !token.is_empty())
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    /// Токен совпадает с импортом целиком или с префиксом `token/`
    pub fn resolve(&self, import: &str) -> Option<PathBuf> {
        self.entries.iter().find_map(|(token, dir)| {
            if import == token {
                return Some(dir.clone());
            }
            let rest = import.strip_prefix(token.as_str())?.strip_prefix('/')?;
            Some(dir.join(rest))
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &PathBuf)> {
        self.entries.iter().map(|(token, dir)| (token.as_str(), dir))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> AliasResolver {
        AliasResolver::new(vec![
            ("@".to_string(), PathBuf::from("/srv/front/src")),
            ("@assets".to_string(), PathBuf::from("/srv/front/assets")),
        ])
    }

    #[test]
    fn test_resolve_at_alias() {
        let resolver = resolver();

        assert_eq!(
            resolver.resolve("@/components/PostList.vue"),
            Some(PathBuf::from("/srv/front/src/components/PostList.vue"))
        );
        assert_eq!(resolver.resolve("@"), Some(PathBuf::from("/srv/front/src")));
    }

    #[test]
    fn test_longest_token_wins() {
        assert_eq!(
            resolver().resolve("@assets/logo.png"),
            Some(PathBuf::from("/srv/front/assets/logo.png"))
        );
    }

    #[test]
    fn test_non_alias_imports_untouched() {
        let resolver = resolver();

        assert_eq!(resolver.resolve("vue"), None);
        assert_eq!(resolver.resolve("@vitejs/plugin-vue"), None);
        assert_eq!(resolver.resolve("./router"), None);
    }
}
