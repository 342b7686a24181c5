use std::{
    env,
    path::{Component, Path, PathBuf},
};

use crate::error::{PathError, PathResult};

pub trait PathResolver {
    /// Resolves a path string that may contain environment variables
    ///
    /// This method expands environment variables in the format `$VAR` or `${VAR}`, resolves tilde
    /// (`~`) to the user's home directory when it appears at the start of the path, and converts
    /// relative paths to absolute paths based on the current working directory.
    ///
    /// # Errors
    ///
    /// * [`PathError::Empty`] if the path is empty
    /// * [`PathError::CurrentDir`] if the current directory cannot be determined
    /// * [`PathError::MissingEnvVar`] if the environment variables are undefined
    /// * [`PathError::UnclosedVariable`] for a `${` without its closing brace
    ///
    /// # Example
    ///
    /// ```
    /// use parcel_utils::error::PathResult;
    /// use parcel_utils::path::{PathResolver, SystemPathResolver};
    ///
    /// fn main() -> PathResult<()> {
    ///     let resolver = SystemPathResolver;
    ///     let resolved = resolver.resolve_path("~/packages/frontend")?;
    ///     println!("Resolved path is {:#?}", resolved);
    ///     Ok(())
    /// }
    /// ```
    fn resolve_path(&self, path: &str) -> PathResult<PathBuf>;

    /// Returns the user's home directory
    ///
    /// Uses `HOME`, falling back to `/home/$USER`.
    fn home_dir(&self) -> PathBuf;

    /// Returns `XDG_CONFIG_HOME`, defaulting to `$HOME/.config`.
    fn xdg_config_home(&self) -> PathBuf;

    /// Returns `XDG_CACHE_HOME`, defaulting to `$HOME/.cache`.
    fn xdg_cache_home(&self) -> PathBuf;
}

/// The default [`PathResolver`] implementation using environment variables and filesystem calls.
pub struct SystemPathResolver;

impl PathResolver for SystemPathResolver {
    fn resolve_path(&self, path: &str) -> PathResult<PathBuf> {
        let path = path.trim();

        if path.is_empty() {
            return Err(PathError::Empty);
        }

        let expanded = PathBuf::from(self.expand(path)?);

        if expanded.is_absolute() {
            Ok(expanded)
        } else {
            env::current_dir()
                .map(|cwd| cwd.join(expanded))
                .map_err(|err| PathError::CurrentDir { source: err })
        }
    }

    fn home_dir(&self) -> PathBuf {
        env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| {
            let user = env::var("USER").unwrap_or_default();
            PathBuf::from("/home").join(user)
        })
    }

    fn xdg_config_home(&self) -> PathBuf {
        env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.home_dir().join(".config"))
    }

    fn xdg_cache_home(&self) -> PathBuf {
        env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.home_dir().join(".cache"))
    }
}

impl SystemPathResolver {
    fn expand(&self, input: &str) -> PathResult<String> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        if let Some(stripped) = rest.strip_prefix('~') {
            if stripped.is_empty() || stripped.starts_with('/') {
                out.push_str(&self.home_dir().to_string_lossy());
                rest = stripped;
            }
        }

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            let (name, remainder) = if let Some(braced) = after.strip_prefix('{') {
                let end = braced.find('}').ok_or_else(|| PathError::UnclosedVariable {
                    input: rest[pos..].to_string(),
                })?;
                (&braced[..end], &braced[end + 1..])
            } else {
                let end = after
                    .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], &after[end..])
            };

            if name.is_empty() {
                out.push('$');
            } else {
                out.push_str(&self.lookup(name, input)?);
            }
            rest = remainder;
        }

        out.push_str(rest);
        Ok(out)
    }

    fn lookup(&self, name: &str, input: &str) -> PathResult<String> {
        match name {
            "HOME" => Ok(self.home_dir().to_string_lossy().into_owned()),
            "XDG_CONFIG_HOME" => Ok(self.xdg_config_home().to_string_lossy().into_owned()),
            "XDG_CACHE_HOME" => Ok(self.xdg_cache_home().to_string_lossy().into_owned()),
            _ => env::var(name).map_err(|_| PathError::MissingEnvVar {
                var: name.into(),
                input: input.into(),
            }),
        }
    }
}

/// See [`PathResolver::resolve_path`].
pub fn resolve_path(path: &str) -> PathResult<PathBuf> {
    SystemPathResolver.resolve_path(path)
}

/// See [`PathResolver::home_dir`].
pub fn home_dir() -> PathBuf {
    SystemPathResolver.home_dir()
}

/// See [`PathResolver::xdg_config_home`].
pub fn xdg_config_home() -> PathBuf {
    SystemPathResolver.xdg_config_home()
}

/// See [`PathResolver::xdg_cache_home`].
pub fn xdg_cache_home() -> PathBuf {
    SystemPathResolver.xdg_cache_home()
}

/// Lexically normalizes a relative path, dropping `.` segments and folding `..`.
///
/// An empty result means "the directory itself". Nothing touches the filesystem, so the result
/// can be joined onto any base without following links.
///
/// # Errors
///
/// * [`PathError::NotRelative`] for absolute paths
/// * [`PathError::EscapesRoot`] when `..` climbs above the starting directory
pub fn normalize_relative<P: AsRef<Path>>(path: P) -> PathResult<PathBuf> {
    let path = path.as_ref();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(PathError::EscapesRoot {
                        path: path.to_path_buf(),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::NotRelative {
                    path: path.to_path_buf(),
                });
            }
        }
    }

    Ok(normalized)
}

/// Normalizes a directory inside a source tree, where a leading `/` means the source root.
///
/// `"/"`, `"."` and `""` all map to the empty path.
pub fn normalize_source_path(path: &str) -> PathResult<PathBuf> {
    normalize_relative(path.trim_start_matches('/'))
}

/// Returns the last meaningful segment of a slash separated location, ignoring trailing
/// slashes and a `.git` suffix.
pub fn base_name(location: &str) -> Option<&str> {
    let trimmed = location.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .filter(|s| !s.is_empty())?;
    let last = last.strip_suffix(".git").unwrap_or(last);
    (!last.is_empty() && last != "." && last != "..").then_some(last)
}
