//! Lua recipe loader.
//!
//! A recipe file returns one recipe table or a list of them. Each file is
//! evaluated in a fresh runtime with a read-only `kiln` global:
//! - `kiln.version` - kiln version
//! - `kiln.platform` - host triple (e.g., "x86_64-linux")
//! - `kiln.os` / `kiln.arch` - host OS and CPU
//! - `kiln.dir` - directory of the recipe file

use std::collections::BTreeMap;
use std::path::Path;

use mlua::prelude::*;

use super::RecipeError;
use super::types::{RecipeDef, RecipeId, RecipeKind, StageCommands};
use super::version::{RecipeVersion, Requirement, is_valid_recipe_name};
use crate::platform::{HostPlatform, TargetArch};

const KNOWN_FIELDS: &[&str] = &[
  "name", "version", "kind", "depends", "url", "sha256", "archs", "min_api", "patches", "env", "stages", "hosts",
];

const KNOWN_STAGES: &[&str] = &["configure", "compile", "install"];

/// Evaluate a recipe file and return every recipe it declares.
pub fn load_recipe_file(path: &Path) -> Result<Vec<RecipeDef>, RecipeError> {
  let content = std::fs::read_to_string(path).map_err(|source| RecipeError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let dir = path.parent().unwrap_or(Path::new("."));

  let lua_err = |e: LuaError| RecipeError::Lua {
    path: path.to_path_buf(),
    message: e.to_string(),
  };

  let lua = create_runtime(dir).map_err(lua_err)?;
  let value = lua
    .load(&content)
    .set_name(format!("@{}", path.display()))
    .eval::<LuaValue>()
    .map_err(lua_err)?;

  let LuaValue::Table(table) = value else {
    return Err(invalid(path, format!("file must return a table, got {}", value.type_name())));
  };

  let tables: Vec<LuaTable> = if table.contains_key("name").map_err(lua_err)? {
    vec![table]
  } else {
    table
      .sequence_values::<LuaTable>()
      .collect::<LuaResult<_>>()
      .map_err(lua_err)?
  };

  if tables.is_empty() {
    return Err(invalid(path, "file declares no recipes".to_string()));
  }

  tables.iter().map(|t| parse_recipe_table(t, path, dir)).collect()
}

fn create_runtime(dir: &Path) -> LuaResult<Lua> {
  let lua = Lua::new();

  let fields = lua.create_table()?;
  fields.set("version", env!("CARGO_PKG_VERSION"))?;
  if let Some(host) = HostPlatform::current() {
    fields.set("platform", host.triple())?;
    fields.set("os", host.os.as_str())?;
    fields.set("arch", host.arch.as_str())?;
  }
  fields.set("dir", dir.to_string_lossy().to_string())?;

  let meta = lua.create_table()?;
  meta.set("__index", fields)?;
  meta.set(
    "__newindex",
    lua.create_function(|_, (_, key): (LuaValue, LuaValue)| -> LuaResult<()> {
      Err(LuaError::external(format!(
        "kiln is read-only (attempted to set '{}')",
        key.to_string().unwrap_or_default()
      )))
    })?,
  )?;

  let kiln = lua.create_table()?;
  kiln.set_metatable(Some(meta))?;
  lua.globals().set("kiln", kiln)?;

  Ok(lua)
}

fn parse_recipe_table(table: &LuaTable, path: &Path, dir: &Path) -> Result<RecipeDef, RecipeError> {
  let field_err = |field: &str, e: LuaError| invalid(path, format!("field '{}': {}", field, e));

  for pair in table.pairs::<LuaValue, LuaValue>() {
    let (key, _) = pair.map_err(|e| invalid(path, e.to_string()))?;
    let key = match key {
      LuaValue::String(s) => s.to_string_lossy(),
      other => return Err(invalid(path, format!("unexpected {} key in recipe table", other.type_name()))),
    };
    if !KNOWN_FIELDS.contains(&key.as_str()) {
      return Err(invalid(path, format!("unknown field '{}'", key)));
    }
  }

  let name: String = table
    .get::<Option<String>>("name")
    .map_err(|e| field_err("name", e))?
    .ok_or_else(|| invalid(path, "missing field 'name'".to_string()))?;
  if !is_valid_recipe_name(&name) {
    return Err(invalid(
      path,
      format!("invalid recipe name '{}': use letters, digits, '-' and '_'", name),
    ));
  }
  let in_recipe = |message: String| invalid(path, format!("{}: {}", name, message));

  let version_text: String = table
    .get::<Option<String>>("version")
    .map_err(|e| field_err("version", e))?
    .ok_or_else(|| in_recipe("missing field 'version'".to_string()))?;
  let version = RecipeVersion::parse(&version_text).map_err(|e| in_recipe(e.to_string()))?;

  let kind = match table.get::<Option<String>>("kind").map_err(|e| field_err("kind", e))? {
    None => RecipeKind::Library,
    Some(k) => RecipeKind::parse(&k).ok_or_else(|| {
      in_recipe(format!(
        "unknown kind '{}' (expected toolchain, runtime or library)",
        k
      ))
    })?,
  };

  let depends = table
    .get::<Option<Vec<String>>>("depends")
    .map_err(|e| field_err("depends", e))?
    .unwrap_or_default()
    .iter()
    .map(|d| Requirement::parse(d).map_err(|e| in_recipe(e.to_string())))
    .collect::<Result<Vec<_>, _>>()?;

  let url: Option<String> = table.get("url").map_err(|e| field_err("url", e))?;
  let sha256: Option<String> = table
    .get::<Option<String>>("sha256")
    .map_err(|e| field_err("sha256", e))?
    .map(|s| s.to_ascii_lowercase());

  match (&url, &sha256) {
    (Some(_), None) => return Err(in_recipe("'url' requires 'sha256'".to_string())),
    (None, Some(_)) => return Err(in_recipe("'sha256' without 'url'".to_string())),
    _ => {}
  }
  if let Some(sha) = &sha256
    && (sha.len() != 64 || !sha.bytes().all(|b| b.is_ascii_hexdigit()))
  {
    return Err(in_recipe(format!("'sha256' must be 64 hex characters, got '{}'", sha)));
  }
  if kind == RecipeKind::Toolchain && url.is_none() {
    return Err(in_recipe("toolchain recipes require 'url'".to_string()));
  }

  let archs = table
    .get::<Option<Vec<String>>>("archs")
    .map_err(|e| field_err("archs", e))?
    .map(|list| {
      list
        .iter()
        .map(|a| a.parse::<TargetArch>().map_err(|e| in_recipe(e.to_string())))
        .collect::<Result<Vec<_>, _>>()
    })
    .transpose()?;

  let min_api: Option<u32> = table.get("min_api").map_err(|e| field_err("min_api", e))?;

  let patches = table
    .get::<Option<Vec<String>>>("patches")
    .map_err(|e| field_err("patches", e))?
    .unwrap_or_default()
    .into_iter()
    .map(|p| dir.join(p))
    .collect();

  let env: BTreeMap<String, String> = table
    .get::<Option<BTreeMap<String, String>>>("env")
    .map_err(|e| field_err("env", e))?
    .unwrap_or_default();

  let stages = match table.get::<Option<LuaTable>>("stages").map_err(|e| field_err("stages", e))? {
    None => StageCommands::default(),
    Some(stages) => parse_stages(&stages).map_err(in_recipe)?,
  };
  if kind == RecipeKind::Toolchain && stages != StageCommands::default() {
    return Err(in_recipe("toolchain recipes cannot declare build stages".to_string()));
  }

  let hosts: Option<Vec<String>> = table.get("hosts").map_err(|e| field_err("hosts", e))?;
  let hosts = match hosts {
    Some(hosts) => {
      let mut canonical = Vec::with_capacity(hosts.len());
      for host in hosts {
        let Some(platform) = HostPlatform::parse(&host) else {
          return Err(in_recipe(format!("unknown host '{}' (expected <arch>-<os>, e.g. x86_64-linux)", host)));
        };
        canonical.push(platform.triple());
      }
      Some(canonical)
    }
    None => None,
  };

  Ok(RecipeDef {
    id: RecipeId::new(name, version),
    kind,
    depends,
    url,
    sha256,
    archs,
    min_api,
    patches,
    env,
    stages,
    hosts,
    origin: path.to_path_buf(),
  })
}

fn parse_stages(table: &LuaTable) -> Result<StageCommands, String> {
  for pair in table.pairs::<String, LuaValue>() {
    let (key, _) = pair.map_err(|e| format!("stages: {}", e))?;
    if !KNOWN_STAGES.contains(&key.as_str()) {
      return Err(format!(
        "unknown stage '{}' (expected configure, compile or install)",
        key
      ));
    }
  }

  let get = |stage: &str| -> Result<Option<String>, String> {
    table
      .get::<Option<String>>(stage)
      .map_err(|e| format!("stages.{}: {}", stage, e))
  };

  Ok(StageCommands {
    configure: get("configure")?,
    compile: get("compile")?,
    install: get("install")?,
  })
}

fn invalid(path: &Path, message: String) -> RecipeError {
  RecipeError::Invalid {
    path: path.to_path_buf(),
    message,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write_recipe(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
  }

  const SHA: &str = "5c5ccb2f9ad12d5e2a1b4b2a0c3bf1ad6bc2dfb39a0a6a2b1c13d6b2f1a3e4d5";

  #[test]
  fn loads_full_recipe_table() {
    let dir = TempDir::new().unwrap();
    let path = write_recipe(
      &dir,
      "libffi.lua",
      &format!(
        r#"
        return {{
          name = "libffi",
          version = "3.4.4",
          kind = "library",
          depends = {{ "android-ndk", "hostpython3>=3.11" }},
          url = "https://example.invalid/libffi-3.4.4.tar.gz",
          sha256 = "{}",
          archs = {{ "arm64-v8a" }},
          min_api = 21,
          patches = {{ "fix.patch" }},
          env = {{ CFLAGS = "-O2" }},
          stages = {{ configure = "./configure", compile = "make", install = "make install" }},
        }}
        "#,
        SHA.to_uppercase()
      ),
    );

    let recipes = load_recipe_file(&path).unwrap();
    assert_eq!(recipes.len(), 1);
    let r = &recipes[0];
    assert_eq!(r.id.to_string(), "libffi@3.4.4");
    assert_eq!(r.kind, RecipeKind::Library);
    assert_eq!(r.depends.len(), 2);
    assert_eq!(r.sha256.as_deref(), Some(SHA));
    assert_eq!(r.archs, Some(vec![TargetArch::Arm64V8a]));
    assert_eq!(r.patches, vec![dir.path().join("fix.patch")]);
    assert_eq!(r.env.get("CFLAGS").map(String::as_str), Some("-O2"));
    assert_eq!(r.stages.install.as_deref(), Some("make install"));
  }

  #[test]
  fn file_may_return_a_list_of_versions() {
    let dir = TempDir::new().unwrap();
    let path = write_recipe(
      &dir,
      "liba.lua",
      r#"
      local versions = {}
      for _, v in ipairs({ "1.0", "1.1" }) do
        table.insert(versions, { name = "liba", version = v })
      end
      return versions
      "#,
    );

    let recipes = load_recipe_file(&path).unwrap();
    let ids: Vec<String> = recipes.iter().map(|r| r.id.to_string()).collect();
    assert_eq!(ids, vec!["liba@1.0", "liba@1.1"]);
  }

  #[test]
  fn kiln_global_is_read_only() {
    let dir = TempDir::new().unwrap();
    let path = write_recipe(
      &dir,
      "bad.lua",
      r#"kiln.version = "0"; return { name = "x", version = "1" }"#,
    );
    let err = load_recipe_file(&path).unwrap_err();
    assert!(err.to_string().contains("read-only"), "{}", err);
  }

  #[test]
  fn kiln_global_exposes_host() {
    let dir = TempDir::new().unwrap();
    let path = write_recipe(
      &dir,
      "host.lua",
      r#"return { name = "probe", version = "1", env = { HOST = kiln.platform, KILN = kiln.version } }"#,
    );
    let recipes = load_recipe_file(&path).unwrap();
    assert_eq!(
      recipes[0].env.get("HOST").cloned(),
      HostPlatform::current().map(|h| h.triple())
    );
    assert_eq!(recipes[0].env.get("KILN").map(String::as_str), Some(env!("CARGO_PKG_VERSION")));
  }

  #[test]
  fn errors_name_the_file() {
    let dir = TempDir::new().unwrap();
    let path = write_recipe(&dir, "broken.lua", "return {");
    let err = load_recipe_file(&path).unwrap_err();
    assert!(err.to_string().contains("broken.lua"), "{}", err);
  }

  #[test]
  fn rejects_unknown_fields_and_stages() {
    let dir = TempDir::new().unwrap();
    let path = write_recipe(&dir, "a.lua", r#"return { name = "a", version = "1", dependz = {} }"#);
    assert!(load_recipe_file(&path).unwrap_err().to_string().contains("dependz"));

    let path = write_recipe(
      &dir,
      "b.lua",
      r#"return { name = "b", version = "1", stages = { build = "make" } }"#,
    );
    assert!(load_recipe_file(&path).unwrap_err().to_string().contains("unknown stage 'build'"));
  }

  #[test]
  fn url_requires_checksum() {
    let dir = TempDir::new().unwrap();
    let path = write_recipe(
      &dir,
      "a.lua",
      r#"return { name = "a", version = "1", url = "https://example.invalid/a.tgz" }"#,
    );
    assert!(load_recipe_file(&path).unwrap_err().to_string().contains("requires 'sha256'"));
  }

  #[test]
  fn hosts_are_validated_and_normalized() {
    let dir = TempDir::new().unwrap();
    let path = write_recipe(
      &dir,
      "h.lua",
      r#"return { name = "h", version = "1", hosts = { "arm64-macos", "x86_64-linux" } }"#,
    );
    let recipes = load_recipe_file(&path).unwrap();
    assert_eq!(
      recipes[0].hosts,
      Some(vec!["aarch64-darwin".to_string(), "x86_64-linux".to_string()])
    );

    let path = write_recipe(&dir, "bad.lua", r#"return { name = "bad", version = "1", hosts = { "linux" } }"#);
    assert!(load_recipe_file(&path).unwrap_err().to_string().contains("unknown host 'linux'"));
  }

  #[test]
  fn toolchains_need_url_and_no_stages() {
    let dir = TempDir::new().unwrap();
    let path = write_recipe(&dir, "ndk.lua", r#"return { name = "ndk", version = "25b", kind = "toolchain" }"#);
    assert!(load_recipe_file(&path).unwrap_err().to_string().contains("require 'url'"));
  }
}
