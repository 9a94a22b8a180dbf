//! LLM Prompt 模板
//!
//! 定义单文件文档与项目级总览文档的 Prompt 模板

/// 单文件文档生成 Prompt
pub const FILE_DOC_PROMPT: &str = r#"请为以下项目文件生成一份说明文档。

项目名称: {project_name}
项目描述: {project_description}
文件路径: {relative_path}

文件内容:
```
{file_content}
```
{truncation_note}
请提供以下内容：
1. 文件概述：简要描述这个文件的主要功能和用途
2. 主要组件：列出文件中的类、函数、常量等主要组件
3. 关键逻辑：解释核心算法或业务逻辑
4. 与项目的关系：说明该文件在整个项目中扮演的角色

要求：
- 只描述文件中明确存在的内容，不要推测或编造
- 使用 Markdown 格式输出
- 保持专业和简洁
"#;

/// 文件内容被截断时附加的说明
pub const TRUNCATION_NOTE: &str =
    "\n注意：受长度限制，以上内容为文件的截断片段，请基于可见部分撰写文档。\n";

/// 项目总览文档 Prompt
pub const PROJECT_OVERVIEW_PROMPT: &str = r#"请根据以下各文件的文档摘要，生成项目的总览文档。

项目名称: {project_name}
项目描述: {project_description}
{readme_note}
各文件文档摘要:
{file_summaries}

请生成一份完整的项目总览，包含以下内容：
1. 项目简介：项目名称、一句话描述、解决的问题
2. 项目结构：主要目录与文件的职责划分
3. 核心功能：各个核心模块的功能说明
4. 模块关系：模块之间的依赖与协作方式
5. 快速上手：根据文件内容推断的环境要求与启动方式

要求：
- 只依据上述摘要中明确存在的信息，不要编造
- 如果某些信息无法推断，用 `<待补充>` 标记
- 使用 Markdown 格式，层次清晰
"#;

/// 格式化单文件文档 Prompt
pub fn format_file_doc_prompt(
    relative_path: &str,
    project_name: &str,
    project_description: &str,
    file_content: &str,
    truncated: bool,
) -> String {
    FILE_DOC_PROMPT
        .replace("{project_name}", project_name)
        .replace("{project_description}", project_description)
        .replace("{relative_path}", relative_path)
        .replace("{file_content}", file_content)
        .replace("{truncation_note}", if truncated { TRUNCATION_NOTE } else { "" })
}

/// 格式化项目总览 Prompt
pub fn format_project_overview_prompt(
    project_name: &str,
    project_description: &str,
    readme_note: Option<&str>,
    file_summaries: &str,
) -> String {
    let note = readme_note
        .filter(|n| !n.trim().is_empty())
        .map(|n| format!("补充说明: {}\n", n))
        .unwrap_or_default();
    PROJECT_OVERVIEW_PROMPT
        .replace("{project_name}", project_name)
        .replace("{project_description}", project_description)
        .replace("{readme_note}", &note)
        .replace("{file_summaries}", file_summaries)
}
