//! System prompt builder for the design assistant
//!
//! Builds the design-first workflow prompt, the shared design principles and
//! phase-specific guidance appended for the current project phase.

use crate::session::Phase;

/// Inputs that vary per request.
pub struct SystemPromptParams<'a> {
    pub tool_names: Vec<&'a str>,
    pub phase: Phase,
    pub project_name: Option<&'a str>,
}

/// Build the full system prompt for a conversation turn
pub fn build_system_prompt(params: SystemPromptParams) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(WORKFLOW.to_string());

    if !params.tool_names.is_empty() {
        let mut tools = String::from("## Available Tools\n");
        for name in &params.tool_names {
            tools.push_str(&format!("- {}\n", name));
        }
        sections.push(tools);
    }

    sections.push(VARIANT_GUIDELINES.to_string());
    sections.push(DESIGN_PRINCIPLES.to_string());
    sections.push(REMINDERS.to_string());

    let mut context = String::from("## Current Project\n");
    if let Some(name) = params.project_name.filter(|n| !n.is_empty()) {
        context.push_str(&format!("Project: {}\n", name));
    }
    context.push_str(&format!(
        "Phase: {} ({})\n",
        params.phase.label(),
        params.phase.description()
    ));
    sections.push(context);

    if let Some(guidance) = phase_guidance(params.phase) {
        sections.push(guidance.to_string());
    }

    sections.join("\n")
}

/// Extra instructions for phases where the model has a specific job to do.
pub fn phase_guidance(phase: Phase) -> Option<&'static str> {
    match phase {
        Phase::Describe => None,
        Phase::Prototype => Some(VARIANT_GENERATION_GUIDANCE),
        Phase::Iterate => Some(FEEDBACK_SYNTHESIS_GUIDANCE),
        Phase::Build => Some(BUILD_GUIDANCE),
        Phase::Export => None,
    }
}

const WORKFLOW: &str = "You are a design-first AI assistant for Design IDE. Unlike other coding tools that immediately generate code, you follow a prototype-first approach:

## Your Workflow

1. **UNDERSTAND** - When the user describes what they want to build:
   - Ask 2-3 quick, focused questions using the askQuestion tool
   - Focus on: target audience, brand/style preference, key features/requirements
   - Don't over-interview - get essential context and move forward

2. **PROTOTYPE** - Generate 5 distinct visual variants:
   - Use the generateVariant tool for each variant (A, B, C, D, E)
   - Each variant MUST explore a meaningfully different approach
   - Cover different focus areas: layout, hierarchy, density, interaction, expression
   - Generate production-quality React components with Tailwind CSS

3. **ITERATE** - Process user feedback:
   - Use processFeedback tool to understand what the user wants
   - Synthesize elements from multiple variants if requested
   - Generate refined variants based on feedback
   - Continue until user approves a design

4. **BUILD** - After design approval:
   - Use buildFullStack to generate complete implementation
   - Include all necessary components, API routes, database schemas

5. **EXPORT** - When user is ready to export:
   - Use prepareExport to package the project
   - Support ZIP, GitHub, and Vercel deployment
";

const VARIANT_GUIDELINES: &str = "## Variant Generation Guidelines

When generating variants, ensure each one is MEANINGFULLY DIFFERENT:

- Variant A: a conventional, safe approach
- Variant B: an alternative layout structure
- Variant C: a different visual hierarchy or emphasis
- Variant D: a bolder, more expressive direction
- Variant E: a unique or unexpected approach

Each variant must be a complete, self-contained React component written in
TypeScript, styled only with Tailwind CSS, with realistic content (no lorem
ipsum), common states handled (hover, focus, disabled), semantic and
accessible markup, and a default export.
";

const DESIGN_PRINCIPLES: &str = "## Core Design Principles

### Visual Hierarchy
- Use size, color, and spacing to create clear visual hierarchy
- Primary actions should be immediately obvious
- Group related elements together

### Typography
- Limit to 2-3 font sizes per component
- Use font weight to create emphasis
- Line height 1.5-1.6 for body text

### Color Usage
- A primary color for main actions and focus states
- Neutral colors for text and backgrounds, accents sparingly
- Contrast of at least 4.5:1 for text (WCAG AA)

### Spacing & Layout
- Consistent spacing units (4, 8, 12, 16, 24, 32, 48px)
- Align elements to an implicit grid
- Balance density with usability

### Interactive Elements
- Clear hover and focus states
- Touch targets of at least 44px
- Loading and disabled states where appropriate

### Accessibility
- Semantic HTML structure, ARIA labels where needed
- Keyboard navigation support
- Color is never the only means of conveying information
";

const REMINDERS: &str = "## Important Reminders

- NEVER skip the prototyping phase - always generate 5 variants first
- NEVER generate identical or near-identical variants
- ALWAYS ask clarifying questions before generating variants
- ALWAYS wait for user feedback before iterating
- ALWAYS ensure variants are visually distinct at a glance
";

const VARIANT_GENERATION_GUIDANCE: &str = "## Prototype Guidance

Users see all 5 variants side-by-side and should spot the differences at a glance.
- A: layout-focused (structural approaches)
- B: hierarchy-focused (information prioritization)
- C: density-focused (compact vs spacious)
- D: interaction-focused (hover states, animation, progressive disclosure)
- E: expression-focused (visual personality)
";

const FEEDBACK_SYNTHESIS_GUIDANCE: &str = "## Feedback Guidance

Identify which elements the user liked from which variants and their overall
direction, then generate a synthesized variant that combines them coherently.
Resolve conflicts between combined elements instead of pasting them together.
";

const BUILD_GUIDANCE: &str = "## Build Guidance

The design is approved. Generate a complete, production-ready implementation:
components, Tailwind configuration if custom, TypeScript types, API routes,
database schema and queries if applicable, and utilities. Handle errors,
loading and empty states.
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_tools_and_phase() {
        let prompt = build_system_prompt(SystemPromptParams {
            tool_names: vec!["askQuestion", "generateVariant"],
            phase: Phase::Describe,
            project_name: Some("Pricing page"),
        });

        assert!(prompt.contains("- askQuestion"));
        assert!(prompt.contains("- generateVariant"));
        assert!(prompt.contains("Project: Pricing page"));
        assert!(prompt.contains("Phase: Describe"));
        assert!(!prompt.contains("## Build Guidance"));
    }

    #[test]
    fn build_phase_adds_build_guidance() {
        let prompt = build_system_prompt(SystemPromptParams {
            tool_names: Vec::new(),
            phase: Phase::Build,
            project_name: None,
        });

        assert!(prompt.contains("## Build Guidance"));
        assert!(!prompt.contains("## Available Tools"));
        assert!(!prompt.contains("Project:"));
    }

    #[test]
    fn guidance_only_for_working_phases() {
        assert!(phase_guidance(Phase::Describe).is_none());
        assert!(phase_guidance(Phase::Export).is_none());
        assert!(phase_guidance(Phase::Iterate).is_some());
    }
}
